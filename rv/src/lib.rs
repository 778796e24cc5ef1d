//! Rendezvous - a timed barrier between emitters and consumers
//!
//! Emitters are participants whose completion a round waits for. Any
//! registered emitter can open a round on its [`Broker`]; the broker then
//! waits, under a single shared deadline, for every other emitter registered
//! at that moment to resolve. If all of them do, every consumer is notified
//! concurrently. Either way the round resets and the next one may begin.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rendezvous::{Broker, Emitter, LogConsumer};
//!
//! # async fn run() -> Result<(), rendezvous::BrokerError> {
//! let broker = Broker::new(Duration::from_millis(200));
//! let first = Emitter::new();
//! let second = Emitter::new();
//! let _ = broker.register_emitters([&first, &second]).await;
//! broker.register_consumer(Arc::new(LogConsumer::new())).await;
//!
//! let waiter = tokio::spawn({
//!     let first = first.clone();
//!     async move { first.emit().await }
//! });
//! tokio::time::sleep(Duration::from_millis(10)).await;
//! second.emit().await?;
//! assert!(waiter.await.unwrap()?);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod emitter;
pub mod error;
pub mod events;
pub mod ids;
pub mod ipc;

pub use broker::{Broker, BrokerMetrics, BrokerRegistry};
pub use config::Config;
pub use consumer::{Consumer, LogConsumer};
pub use emitter::{Emitter, ResolveHook};
pub use error::{BrokerError, RejectReason, Registration};
pub use events::{EventBus, EventHandler, FanOut, ROUND_COMPLETED, RoundNotice};
