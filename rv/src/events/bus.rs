//! Event Bus - topic-keyed fan-out
//!
//! Handlers subscribe to a topic name. Firing a topic runs every handler for
//! it concurrently, each in its own task, and waits until all of them have
//! finished. One failing or panicking handler never affects the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::types::{FanOut, RoundNotice};

/// Asynchronous action invoked when a topic fires
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, notice: RoundNotice) -> Result<()>;
}

/// Adapter for async closures
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(RoundNotice) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, notice: RoundNotice) -> Result<()> {
        (self.0)(notice).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(RoundNotice) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Adapter for synchronous logic, run on the blocking pool
pub struct BlockingHandler<F>(Arc<F>);

#[async_trait]
impl<F> EventHandler for BlockingHandler<F>
where
    F: Fn(&RoundNotice) -> Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, notice: RoundNotice) -> Result<()> {
        let f = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || f(&notice))
            .await
            .map_err(|e| eyre!("Blocking handler failed to complete: {}", e))?
    }
}

/// Wrap a synchronous closure as a handler
pub fn blocking_handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&RoundNotice) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(BlockingHandler(Arc::new(f)))
}

/// Topic-keyed notification bus
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to a topic; duplicates are not filtered
    pub async fn subscribe(&self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let topic = topic.into();
        debug!(%topic, "EventBus::subscribe: new subscriber");
        self.topics.write().await.entry(topic).or_default().push(handler);
    }

    /// Number of handlers subscribed to a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, Vec::len)
    }

    /// Invoke every handler for `topic` concurrently and wait for all of them
    pub async fn fire(&self, topic: &str, notice: &RoundNotice) -> FanOut {
        // Snapshot so handlers may subscribe without deadlocking the bus
        let handlers: Vec<Arc<dyn EventHandler>> = match self.topics.read().await.get(topic) {
            Some(handlers) => handlers.clone(),
            None => Vec::new(),
        };

        let mut report = FanOut::default();
        if handlers.is_empty() {
            debug!(%topic, "EventBus::fire: no subscribers");
            return report;
        }

        debug!(%topic, count = handlers.len(), round = notice.round, "EventBus::fire");
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let notice = notice.clone();
            tasks.spawn(async move { handler.handle(notice).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    error!(%topic, error = %e, "Event handler failed");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(%topic, error = %e, "Event handler panicked");
                    report.failed += 1;
                }
            }
        }

        debug!(%topic, delivered = report.delivered, failed = report.failed, "EventBus::fire: done");
        report
    }
}
