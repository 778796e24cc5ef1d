//! Broker and its round engine

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::metrics::BrokerMetrics;
use crate::config::BrokerConfig;
use crate::consumer::{Consumer, ConsumerHandler};
use crate::emitter::Emitter;
use crate::error::{self, RejectReason, Registration};
use crate::events::{EventBus, ROUND_COMPLETED, RoundNotice};
use crate::ids;

/// The round currently in flight
struct ActiveRound {
    number: u64,
    /// Published once the round has been decided and reset
    outcome: watch::Receiver<Option<bool>>,
}

#[derive(Default)]
struct BrokerState {
    emitters: HashMap<String, Emitter>,
    consumers: HashMap<String, Arc<dyn Consumer>>,
    /// Resolved set of the open round; always a subset of `emitters` keys
    emitted: HashSet<String>,
    /// `Some` exactly while a round is open
    round: Option<ActiveRound>,
    metrics: BrokerMetrics,
}

pub(crate) struct BrokerShared {
    id: String,
    timeout: Duration,
    state: Mutex<BrokerState>,
    bus: EventBus,
}

/// Coordinator of emitters and consumers
///
/// Cloning yields another handle to the same broker. All registry mutation
/// and every round open/close transition happen under one lock, so a round's
/// participant snapshot never races with registration.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("id", &self.shared.id)
            .field("timeout", &self.shared.timeout)
            .finish()
    }
}

impl Broker {
    /// Create a broker with a generated id
    pub fn new(timeout: Duration) -> Self {
        Self::with_id(ids::generate_id(), timeout)
    }

    /// Create a broker with the given id; an empty id is replaced by a generated one
    pub fn with_id(id: impl Into<String>, timeout: Duration) -> Self {
        let id = ids::resolve_id(Some(id.into()));
        info!(broker_id = %id, timeout_ms = error::millis(timeout), "Initialized broker");
        Self {
            shared: Arc::new(BrokerShared {
                id,
                timeout,
                state: Mutex::new(BrokerState::default()),
                bus: EventBus::new(),
            }),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::with_id(config.id.clone().unwrap_or_default(), config.timeout())
    }

    pub(crate) fn from_shared(shared: Arc<BrokerShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Deadline applied to every round
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// The broker's notification bus
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub async fn is_session_open(&self) -> bool {
        self.shared.state.lock().await.round.is_some()
    }

    /// Ids of all registered emitters, sorted
    pub async fn emitter_ids(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut ids: Vec<String> = state.emitters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn emitter(&self, emitter_id: &str) -> Option<Emitter> {
        self.shared.state.lock().await.emitters.get(emitter_id).cloned()
    }

    pub async fn consumer_count(&self) -> usize {
        self.shared.state.lock().await.consumers.len()
    }

    /// Resolved set of the open round, sorted; empty when no round is open
    pub async fn resolved_ids(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut ids: Vec<String> = state.emitted.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn metrics(&self) -> BrokerMetrics {
        self.shared.state.lock().await.metrics.clone()
    }

    /// Attach an emitter
    ///
    /// Rejected, with a warning and no state change, when the emitter belongs
    /// to another broker or while a round is open.
    pub async fn register_emitter(&self, emitter: &Emitter) -> Registration {
        debug!(broker_id = %self.shared.id, emitter_id = %emitter.id(), "Broker::register_emitter: called");
        let mut state = self.shared.state.lock().await;

        if state
            .emitters
            .get(emitter.id())
            .is_some_and(|known| known.same_handle(emitter))
        {
            debug!(emitter_id = %emitter.id(), "Emitter already registered");
            return Registration::AlreadyRegistered;
        }

        if state.round.is_some() {
            warn!(
                broker_id = %self.shared.id,
                emitter_id = %emitter.id(),
                "Rejecting emitter registration while a round is open"
            );
            state.metrics.rejected_registrations += 1;
            return Registration::Rejected(RejectReason::SessionOpen);
        }

        if let Err(reason) = emitter.attach(&self.shared) {
            warn!(
                broker_id = %self.shared.id,
                emitter_id = %emitter.id(),
                "Rejecting emitter owned by another broker"
            );
            state.metrics.rejected_registrations += 1;
            return Registration::Rejected(reason);
        }

        if let Some(replaced) = state.emitters.insert(emitter.id().to_string(), emitter.clone()) {
            debug!(emitter_id = %emitter.id(), "Replacing emitter handle with the same id");
            replaced.detach(&self.shared);
        }
        state.metrics.registered_emitters = state.emitters.len();
        info!(broker_id = %self.shared.id, emitter_id = %emitter.id(), "Registered emitter");
        Registration::Registered
    }

    /// Register several emitters, one outcome per emitter
    pub async fn register_emitters<'a, I>(&self, emitters: I) -> Vec<Registration>
    where
        I: IntoIterator<Item = &'a Emitter>,
    {
        let mut outcomes = Vec::new();
        for emitter in emitters {
            outcomes.push(self.register_emitter(emitter).await);
        }
        outcomes
    }

    /// Remove an emitter; safe at any time
    ///
    /// An emitter removed while a round waits on it counts as unresolved.
    /// One that already resolved keeps its place in the resolved set.
    pub async fn unregister_emitter(&self, emitter_id: &str) -> Option<Emitter> {
        debug!(broker_id = %self.shared.id, %emitter_id, "Broker::unregister_emitter: called");
        let mut state = self.shared.state.lock().await;
        let removed = state.emitters.remove(emitter_id)?;
        removed.detach(&self.shared);
        state.metrics.registered_emitters = state.emitters.len();
        info!(broker_id = %self.shared.id, %emitter_id, "Unregistered emitter");
        Some(removed)
    }

    /// Attach a consumer and subscribe it to round completion
    ///
    /// Returns false if a consumer with the same id is already registered.
    pub async fn register_consumer(&self, consumer: Arc<dyn Consumer>) -> bool {
        let consumer_id = consumer.id().to_string();
        debug!(broker_id = %self.shared.id, %consumer_id, "Broker::register_consumer: called");
        let mut state = self.shared.state.lock().await;
        if state.consumers.contains_key(&consumer_id) {
            debug!(%consumer_id, "Consumer already registered");
            return false;
        }

        self.shared
            .bus
            .subscribe(ROUND_COMPLETED, Arc::new(ConsumerHandler(Arc::clone(&consumer))))
            .await;
        state.consumers.insert(consumer_id.clone(), consumer);
        state.metrics.registered_consumers = state.consumers.len();
        info!(broker_id = %self.shared.id, %consumer_id, "Registered consumer");
        true
    }

    /// Register several consumers, one outcome per consumer
    pub async fn register_consumers<I>(&self, consumers: I) -> Vec<bool>
    where
        I: IntoIterator<Item = Arc<dyn Consumer>>,
    {
        let mut outcomes = Vec::new();
        for consumer in consumers {
            outcomes.push(self.register_consumer(consumer).await);
        }
        outcomes
    }

    /// Run a round on behalf of `initiator_id`, or join the one in flight
    ///
    /// Returns true if every emitter registered when the round opened
    /// resolved before the deadline. An unknown initiator is ignored and
    /// opens nothing. Every caller folded into a round gets that round's
    /// outcome.
    ///
    /// Consumers must not await a round on the same broker from inside
    /// `consume`: the outcome is published only after fan-out completes.
    pub async fn begin_round(&self, initiator_id: &str) -> bool {
        debug!(broker_id = %self.shared.id, %initiator_id, "Broker::begin_round: called");
        let mut state = self.shared.state.lock().await;

        let Some(initiator) = state.emitters.get(initiator_id).cloned() else {
            warn!(broker_id = %self.shared.id, %initiator_id, "Unknown emitter, ignoring round request");
            state.metrics.ignored_signals += 1;
            return false;
        };

        if let Some(round) = &state.round {
            let number = round.number;
            let mut outcome = round.outcome.clone();
            state.emitted.insert(initiator_id.to_string());
            state.metrics.folded_calls += 1;
            drop(state);

            initiator.resolve();
            debug!(broker_id = %self.shared.id, %initiator_id, round = number, "Folded into open round");
            return wait_for_outcome(&mut outcome).await;
        }

        state.metrics.rounds_opened += 1;
        let number = state.metrics.rounds_opened;

        for emitter in state.emitters.values() {
            emitter.arm();
        }
        state.emitted.insert(initiator_id.to_string());

        let participants: Vec<String> = state.emitters.keys().cloned().collect();
        let pending: Vec<Emitter> = state
            .emitters
            .values()
            .filter(|emitter| !state.emitted.contains(emitter.id()))
            .cloned()
            .collect();

        let (outcome_tx, mut outcome) = watch::channel(None);
        state.round = Some(ActiveRound {
            number,
            outcome: outcome.clone(),
        });
        drop(state);

        initiator.resolve();
        info!(
            broker_id = %self.shared.id,
            %initiator_id,
            round = number,
            pending = pending.len(),
            "Round opened"
        );

        let driver = RoundDriver {
            shared: Arc::clone(&self.shared),
            number,
            participants,
            pending,
            outcome_tx,
        };
        tokio::spawn(driver.run());

        wait_for_outcome(&mut outcome).await
    }
}

async fn wait_for_outcome(outcome: &mut watch::Receiver<Option<bool>>) -> bool {
    match outcome.wait_for(Option::is_some).await {
        Ok(decided) => *decided == Some(true),
        // Driver gone without deciding
        Err(_) => false,
    }
}

/// Drives one open round to its close
///
/// Runs as its own task so the round always closes, even if the caller that
/// opened it stops waiting.
struct RoundDriver {
    shared: Arc<BrokerShared>,
    number: u64,
    /// Every emitter registered when the round opened, initiator included
    participants: Vec<String>,
    pending: Vec<Emitter>,
    outcome_tx: watch::Sender<Option<bool>>,
}

impl RoundDriver {
    async fn run(self) {
        let deadline = Instant::now() + self.shared.timeout;

        let mut waits = JoinSet::new();
        for emitter in &self.pending {
            let emitter_id = emitter.id().to_string();
            let mut latch = emitter.latch();
            waits.spawn(async move {
                let resolved = latch.wait_for(|set| *set).await.is_ok();
                (emitter_id, resolved)
            });
        }

        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                joined = waits.join_next() => match joined {
                    None => break,
                    Some(Ok((emitter_id, true))) => self.mark_resolved(&emitter_id).await,
                    Some(Ok((emitter_id, false))) => {
                        warn!(round = self.number, %emitter_id, "Emitter latch closed before resolving");
                    }
                    Some(Err(e)) => {
                        warn!(round = self.number, error = %e, "Emitter wait failed");
                    }
                },
                _ = &mut timer => {
                    warn!(
                        broker_id = %self.shared.id,
                        round = self.number,
                        outstanding = waits.len(),
                        timeout_ms = error::millis(self.shared.timeout),
                        "Round deadline elapsed with emitters pending"
                    );
                    break;
                }
            }
        }
        waits.abort_all();

        let notice = self.decide().await;
        let success = notice.is_some();

        let mut consumer_failures = 0;
        if let Some(notice) = notice {
            let report = self.shared.bus.fire(ROUND_COMPLETED, &notice).await;
            consumer_failures = report.failed;
            info!(
                broker_id = %self.shared.id,
                round = self.number,
                delivered = report.delivered,
                failed = report.failed,
                "Announced round to consumers"
            );
        }

        self.close(success, consumer_failures).await;
        self.outcome_tx.send_replace(Some(success));
    }

    async fn mark_resolved(&self, emitter_id: &str) {
        let mut state = self.shared.state.lock().await;
        if state.emitters.contains_key(emitter_id) {
            debug!(round = self.number, %emitter_id, "Emitter resolved");
            state.emitted.insert(emitter_id.to_string());
        } else {
            warn!(round = self.number, %emitter_id, "Emitter resolved after being unregistered, not counted");
        }
    }

    /// Build the completion notice if every participant resolved
    async fn decide(&self) -> Option<RoundNotice> {
        let state = self.shared.state.lock().await;
        let missing: Vec<&String> = self
            .participants
            .iter()
            .filter(|id| !state.emitted.contains(id.as_str()))
            .collect();

        if !missing.is_empty() {
            warn!(
                broker_id = %self.shared.id,
                round = self.number,
                missing = ?missing,
                "Round failed"
            );
            return None;
        }

        let mut resolved = self.participants.clone();
        resolved.sort();
        let mut notice = RoundNotice::new(self.shared.id.clone(), self.number, resolved);
        for emitter_id in &notice.resolved {
            if let Some(payload) = state.emitters.get(emitter_id).and_then(Emitter::payload) {
                notice.payloads.insert(emitter_id.clone(), payload);
            }
        }
        Some(notice)
    }

    /// Reset per-round state so the broker is ready for the next round
    async fn close(&self, success: bool, consumer_failures: usize) {
        let mut state = self.shared.state.lock().await;
        state.emitted.clear();
        state.round = None;
        if success {
            state.metrics.rounds_succeeded += 1;
        } else {
            state.metrics.rounds_failed += 1;
        }
        state.metrics.consumer_failures += consumer_failures as u64;
        info!(broker_id = %self.shared.id, round = self.number, success, "Round closed");
    }
}
