//! IPC message types
//!
//! JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::broker::BrokerMetrics;

/// Requests from a client to a served broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BrokerRequest {
    /// Create an emitter on the broker side; an absent id is generated
    RegisterEmitter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    UnregisterEmitter { id: String },

    /// Signal completion for an emitter; answered when its round closes
    Emit { id: String },

    Status,

    /// Check the broker is alive
    Ping,

    /// Stop serving
    Shutdown,
}

/// Responses from a served broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BrokerResponse {
    Registered { id: String },

    Rejected { reason: String },

    RoundFinished { success: bool },

    Status { metrics: BrokerMetrics, session_open: bool },

    Pong { version: String },

    /// Acknowledgment
    Ok,

    Error { message: String },
}
