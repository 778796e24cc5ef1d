//! Consumers - subscribers notified when a round succeeds

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::info;

use crate::events::{EventHandler, RoundNotice};
use crate::ids;

/// A subscriber with a stable id and a single async action
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Invoked once per successful round; errors are logged by the bus and
    /// do not affect other consumers
    async fn consume(&self, notice: &RoundNotice) -> Result<()>;
}

/// Default consumer: records the invocation in the log
#[derive(Debug, Clone)]
pub struct LogConsumer {
    id: String,
}

impl Default for LogConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConsumer {
    pub fn new() -> Self {
        Self { id: ids::generate_id() }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: ids::resolve_id(Some(id.into())),
        }
    }
}

#[async_trait]
impl Consumer for LogConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consume(&self, notice: &RoundNotice) -> Result<()> {
        info!(
            consumer_id = %self.id,
            broker_id = %notice.broker_id,
            round = notice.round,
            resolved = notice.resolved.len(),
            "Consuming round"
        );
        Ok(())
    }
}

/// Bus adapter that forwards a fired notice to a consumer
pub(crate) struct ConsumerHandler(pub(crate) Arc<dyn Consumer>);

#[async_trait]
impl EventHandler for ConsumerHandler {
    async fn handle(&self, notice: RoundNotice) -> Result<()> {
        self.0.consume(&notice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_consumer_ids() {
        assert!(!LogConsumer::new().id().is_empty());
        assert_eq!(LogConsumer::with_id("c-1").id(), "c-1");
        assert!(!LogConsumer::with_id("").id().is_empty());
    }

    #[tokio::test]
    async fn test_log_consumer_consumes() {
        let consumer = LogConsumer::with_id("c-1");
        let notice = RoundNotice::new("b", 1, vec![]);
        consumer.consume(&notice).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_forwards_to_consumer() {
        let handler = ConsumerHandler(Arc::new(LogConsumer::new()));
        handler.handle(RoundNotice::new("b", 2, vec!["e".to_string()])).await.unwrap();
    }
}
