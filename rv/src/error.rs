//! Broker error types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Errors surfaced to callers of broker and emitter operations
///
/// Round timeouts are not errors: a round that misses its deadline simply
/// reports `false`.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Emitter {emitter_id} is not attached to a broker")]
    NotAttached { emitter_id: String },

    #[error("Emitter {emitter_id} timed out after {timeout_ms}ms")]
    Timeout { emitter_id: String, timeout_ms: u64 },

    #[error("Broker {broker_id} is already registered")]
    DuplicateBroker { broker_id: String },

    #[error("Broker {broker_id} not found")]
    UnknownBroker { broker_id: String },
}

/// Why a registration was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// The emitter already belongs to a different broker
    OwnedElsewhere,
    /// A round is open; the participant set is frozen until it closes
    SessionOpen,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OwnedElsewhere => write!(f, "emitter is owned by another broker"),
            Self::SessionOpen => write!(f, "a round is currently open"),
        }
    }
}

/// Outcome of registering an emitter
///
/// Rejections are warnings, not failures: nothing is mutated and the caller
/// decides whether to retry once the current round has closed.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    AlreadyRegistered,
    Rejected(RejectReason),
}

impl Registration {
    /// True if the emitter is attached to the broker after the call
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Registered | Self::AlreadyRegistered)
    }
}
