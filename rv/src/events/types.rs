//! Event types carried by the notification bus

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic fired once per successful round
pub const ROUND_COMPLETED: &str = "round.completed";

/// Completion notice delivered to every consumer of a successful round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundNotice {
    /// Broker that ran the round
    pub broker_id: String,

    /// Monotonic round number within that broker, starting at 1
    pub round: u64,

    /// Emitters that resolved before the deadline
    pub resolved: Vec<String>,

    /// Opaque payloads of the resolved emitters that carried one
    pub payloads: BTreeMap<String, serde_json::Value>,

    pub completed_at: DateTime<Utc>,
}

impl RoundNotice {
    pub fn new(broker_id: impl Into<String>, round: u64, resolved: Vec<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            round,
            resolved,
            payloads: BTreeMap::new(),
            completed_at: Utc::now(),
        }
    }
}

/// Result of firing a topic
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOut {
    /// Handlers that completed successfully
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_serializes_payloads() {
        let mut notice = RoundNotice::new("broker-1", 3, vec!["a".to_string(), "b".to_string()]);
        notice.payloads.insert("a".to_string(), serde_json::json!({"rows": 12}));

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["broker_id"], "broker-1");
        assert_eq!(json["round"], 3);
        assert_eq!(json["payloads"]["a"]["rows"], 12);
        assert!(json["payloads"].get("b").is_none());
    }
}
