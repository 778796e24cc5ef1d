//! Inter-Process Communication for remote emitters
//!
//! A broker can be served over a Unix Domain Socket so that emitters living
//! in other processes can register and signal. Each connection carries one
//! request and one response, both single lines of JSON.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::BrokerClient;
pub use listener::{cleanup_socket, create_listener, create_listener_at, read_request, send_response, serve};
pub use messages::{BrokerRequest, BrokerResponse};

/// Maximum message size in either direction
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Default socket path for a served broker
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rendezvous")
        .join("broker.sock")
}
