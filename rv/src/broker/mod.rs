//! Broker - the rendezvous coordinator
//!
//! A broker keeps a registry of emitters and consumers and runs rounds:
//!
//! ```text
//!   emit() ──► begin_round ──► snapshot participants, arm latches
//!                                   │
//!                       RoundDriver (own task)
//!                       wait on latches until deadline
//!                                   │
//!                 all resolved? ──yes──► fire round.completed
//!                                   │
//!                     reset resolved set, publish outcome
//! ```
//!
//! At most one round is open per broker. Callers arriving while a round is
//! open are folded into it and receive its outcome.

mod core;
mod metrics;
mod registry;

pub use self::core::Broker;
pub(crate) use self::core::BrokerShared;
pub use metrics::BrokerMetrics;
pub use registry::BrokerRegistry;
