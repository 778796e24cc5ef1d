//! Notification bus
//!
//! A broker owns one [`EventBus`]. Consumers are subscribed to the
//! [`ROUND_COMPLETED`] topic when they register; the broker fires that topic
//! once for every round in which all participants resolved in time.
//!
//! ```text
//!   Broker ──fire("round.completed", notice)──► EventBus
//!                                                 │
//!                         ┌───────────────┬───────┴───────┐
//!                         ▼               ▼               ▼
//!                    consumer A      consumer B      blocking fn
//!                   (own task)       (own task)    (blocking pool)
//! ```
//!
//! Handlers have one async signature; synchronous logic is adapted with
//! [`blocking_handler`], so the bus never branches on handler shape.

mod bus;
mod types;

pub use bus::{BlockingHandler, EventBus, EventHandler, FnHandler, blocking_handler, handler_fn};
pub use types::{FanOut, ROUND_COMPLETED, RoundNotice};
