//! Broker counters

use serde::{Deserialize, Serialize};

/// Snapshot of a broker's activity since construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerMetrics {
    pub registered_emitters: usize,
    pub registered_consumers: usize,
    pub rounds_opened: u64,
    pub rounds_succeeded: u64,
    pub rounds_failed: u64,
    /// `begin_round` calls folded into an already-open round
    pub folded_calls: u64,
    pub rejected_registrations: u64,
    /// Round requests from ids the broker does not know
    pub ignored_signals: u64,
    pub consumer_failures: u64,
}
