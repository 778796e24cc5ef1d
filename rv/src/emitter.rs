//! Emitter - a participant whose completion a round waits for
//!
//! An emitter is created on its own and attached to at most one broker by
//! registration. Its resolution latch is a `watch` channel the broker re-arms
//! whenever a round opens, so a signal from one round never leaks into the
//! next.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::broker::{Broker, BrokerShared};
use crate::error::{self, BrokerError, RejectReason};
use crate::ids;

/// Single-slot callback invoked when an emitter resolves
///
/// Plain closures taking the emitter id implement this trait.
pub trait ResolveHook: Send + Sync + 'static {
    fn on_resolve(&self, emitter_id: &str);
}

impl<F> ResolveHook for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn on_resolve(&self, emitter_id: &str) {
        self(emitter_id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EmitterInner {
    id: String,
    owner: Mutex<Weak<BrokerShared>>,
    latch: watch::Sender<bool>,
    hook: Mutex<Option<Arc<dyn ResolveHook>>>,
    payload: Mutex<Option<serde_json::Value>>,
}

/// Participant handle; clones share the same identity and latch
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("id", &self.inner.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    /// Create an emitter with a generated id
    pub fn new() -> Self {
        Self::from_id(ids::generate_id())
    }

    /// Create an emitter with the given id; an empty id is replaced by a generated one
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::from_id(ids::resolve_id(Some(id.into())))
    }

    fn from_id(id: String) -> Self {
        debug!(%id, "Emitter::new: created");
        let (latch, _) = watch::channel(false);
        Self {
            inner: Arc::new(EmitterInner {
                id,
                owner: Mutex::new(Weak::new()),
                latch,
                hook: Mutex::new(None),
                payload: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Install the resolve hook, replacing any previous one
    pub fn set_hook(&self, hook: impl ResolveHook) {
        *lock(&self.inner.hook) = Some(Arc::new(hook));
    }

    pub fn clear_hook(&self) {
        *lock(&self.inner.hook) = None;
    }

    /// Attach an opaque payload, forwarded to consumers when the round succeeds
    pub fn set_payload(&self, payload: serde_json::Value) {
        *lock(&self.inner.payload) = Some(payload);
    }

    pub fn payload(&self) -> Option<serde_json::Value> {
        lock(&self.inner.payload).clone()
    }

    /// The owning broker, if attached and still alive
    pub fn broker(&self) -> Option<Broker> {
        lock(&self.inner.owner).upgrade().map(Broker::from_shared)
    }

    pub fn is_attached(&self) -> bool {
        self.broker().is_some()
    }

    /// Whether the latch is currently set
    pub fn is_resolved(&self) -> bool {
        *self.inner.latch.borrow()
    }

    /// True if both handles refer to the same emitter object
    pub fn same_handle(&self, other: &Emitter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Signal completion
    ///
    /// With no open round this starts one. During an open round it resolves
    /// this emitter and joins that round. Either way the caller gets the
    /// round's final outcome, so concurrent emitters always agree.
    pub async fn emit(&self) -> Result<bool, BrokerError> {
        debug!(emitter_id = %self.inner.id, "Emitter::emit: called");
        let broker = self.broker().ok_or_else(|| BrokerError::NotAttached {
            emitter_id: self.inner.id.clone(),
        })?;

        Ok(broker.begin_round(&self.inner.id).await)
    }

    /// Set the latch; returns false if it was already set
    ///
    /// The hook runs exactly once per arming of the latch, on the call that
    /// actually sets it.
    pub fn resolve(&self) -> bool {
        let first = self.inner.latch.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        });

        if first {
            debug!(emitter_id = %self.inner.id, "Emitter::resolve: latch set");
            let hook = lock(&self.inner.hook).clone();
            if let Some(hook) = hook {
                hook.on_resolve(&self.inner.id);
            }
        }
        first
    }

    /// Wait until the latch is set or `timeout` elapses
    pub async fn await_resolution(&self, timeout: Duration) -> Result<(), BrokerError> {
        let mut rx = self.inner.latch.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|set| *set)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(BrokerError::Timeout {
                emitter_id: self.inner.id.clone(),
                timeout_ms: error::millis(timeout),
            }),
        }
    }

    /// Clear the latch for a new round
    pub(crate) fn arm(&self) {
        self.inner.latch.send_replace(false);
    }

    pub(crate) fn latch(&self) -> watch::Receiver<bool> {
        self.inner.latch.subscribe()
    }

    /// Claim ownership for `broker`; a live owner that is not `broker` wins
    pub(crate) fn attach(&self, broker: &Arc<BrokerShared>) -> Result<(), RejectReason> {
        let mut owner = lock(&self.inner.owner);
        if let Some(current) = owner.upgrade()
            && !Arc::ptr_eq(&current, broker)
        {
            return Err(RejectReason::OwnedElsewhere);
        }
        *owner = Arc::downgrade(broker);
        Ok(())
    }

    /// Drop ownership if held by `broker`
    pub(crate) fn detach(&self, broker: &Arc<BrokerShared>) {
        let mut owner = lock(&self.inner.owner);
        if owner.upgrade().is_some_and(|current| Arc::ptr_eq(&current, broker)) {
            *owner = Weak::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emitter_id_generated() {
        let emitter = Emitter::new();
        assert!(!emitter.id().is_empty());
    }

    #[test]
    fn test_emitter_manual_id() {
        let emitter = Emitter::with_id("abc-123");
        assert_eq!(emitter.id(), "abc-123");
    }

    #[test]
    fn test_emitter_empty_id_generated() {
        let emitter = Emitter::with_id("");
        assert!(!emitter.id().is_empty());
    }

    #[test]
    fn test_resolve_fires_hook_once() {
        let emitter = Emitter::with_id("e1");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        emitter.set_hook(move |id: &str| {
            assert_eq!(id, "e1");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(emitter.resolve());
        assert!(!emitter.resolve());
        assert!(emitter.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rearm_allows_new_resolution() {
        let emitter = Emitter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        emitter.set_hook(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.resolve();
        emitter.arm();
        assert!(!emitter.is_resolved());
        emitter.resolve();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_latch() {
        let emitter = Emitter::new();
        let clone = emitter.clone();
        clone.resolve();
        assert!(emitter.is_resolved());
        assert!(emitter.same_handle(&clone));
        assert!(!emitter.same_handle(&Emitter::with_id(emitter.id())));
    }

    #[test]
    fn test_payload() {
        let emitter = Emitter::new();
        assert!(emitter.payload().is_none());
        emitter.set_payload(serde_json::json!({"k": "v"}));
        assert_eq!(emitter.payload(), Some(serde_json::json!({"k": "v"})));
    }

    #[tokio::test]
    async fn test_emit_without_broker_fails() {
        let emitter = Emitter::with_id("lonely");
        let err = emitter.emit().await.unwrap_err();
        assert!(matches!(err, BrokerError::NotAttached { ref emitter_id } if emitter_id == "lonely"));
    }

    #[tokio::test]
    async fn test_await_resolution_succeeds() {
        let emitter = Emitter::new();
        let other = emitter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.resolve();
        });

        emitter.await_resolution(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_await_resolution_already_set() {
        let emitter = Emitter::new();
        emitter.resolve();
        emitter.await_resolution(Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_resolution_times_out() {
        let emitter = Emitter::with_id("slow");
        let err = emitter.await_resolution(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { timeout_ms: 50, .. }));
        assert!(!emitter.is_resolved());
    }
}
