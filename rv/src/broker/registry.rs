//! Named collection of brokers

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::core::Broker;
use crate::error::BrokerError;

/// Holds brokers by id for hosts that run several of them
///
/// Removing a broker from the registry does not stop it; handles held
/// elsewhere keep working.
#[derive(Debug, Default)]
pub struct BrokerRegistry {
    brokers: Mutex<HashMap<String, Broker>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker and add it; an absent id is generated
    pub async fn create(&self, id: Option<String>, timeout: Duration) -> Result<Broker, BrokerError> {
        let broker = Broker::with_id(id.unwrap_or_default(), timeout);
        self.insert(broker.clone()).await?;
        Ok(broker)
    }

    /// Add an existing broker; its id must not be taken
    pub async fn insert(&self, broker: Broker) -> Result<(), BrokerError> {
        debug!(broker_id = %broker.id(), "BrokerRegistry::insert: called");
        let mut brokers = self.brokers.lock().await;
        if brokers.contains_key(broker.id()) {
            return Err(BrokerError::DuplicateBroker {
                broker_id: broker.id().to_string(),
            });
        }
        info!(broker_id = %broker.id(), "Added broker to registry");
        brokers.insert(broker.id().to_string(), broker);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Broker, BrokerError> {
        self.brokers
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownBroker { broker_id: id.to_string() })
    }

    pub async fn remove(&self, id: &str) -> Result<Broker, BrokerError> {
        let removed = self
            .brokers
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| BrokerError::UnknownBroker { broker_id: id.to_string() })?;
        info!(broker_id = %id, "Removed broker from registry");
        Ok(removed)
    }

    /// Registered broker ids, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.brokers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.brokers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.brokers.lock().await.is_empty()
    }
}
