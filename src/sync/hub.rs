//! Real-time state synchronization hub.
//!
//! [`StateSyncHub`] owns the canonical [`SessionState`] for every registered
//! session, applies partial updates through a validate→merge→classify→commit
//! →broadcast pipeline, and retains a bounded per-session update history.
//!
//! # Concurrency
//!
//! Sessions are independent: updates for different session ids proceed in
//! parallel. Within one session, the whole pipeline runs under that session's
//! slot mutex, so concurrent writers to the same id serialize and subscribers
//! observe updates in commit order. Nothing inside the pipeline suspends,
//! which is why a sync [`parking_lot::Mutex`] is the right guard.
//!
//! Subscriber callbacks are invoked while the slot lock is held (that is the
//! ordering guarantee); callbacks must be fast and must not call back into
//! the hub for the same session.

use std::collections::VecDeque;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream};
use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::state::{InvariantViolation, SessionState, StatePatch};
use super::update::{WorkflowUpdateEvent, classify_transition, should_notify};
use crate::types::{ExecutionStatus, UpdateType};

/// Delivery failure reported by a subscriber callback.
///
/// Logged by the hub, never surfaced to the update caller.
#[derive(Debug, Error)]
#[error("subscriber delivery failed: {0}")]
pub struct RealtimeDeliveryError(pub String);

/// Callback invoked with every committed update for a session.
pub type UpdateSubscriber =
    Arc<dyn Fn(WorkflowUpdateEvent) -> Result<(), RealtimeDeliveryError> + Send + Sync>;

/// Errors raised by hub operations.
#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    /// Unknown or expired session id; the caller must recreate the session.
    #[error("session not found: {session_id}")]
    #[diagnostic(
        code(convoflow::sync::session_not_found),
        help("The session may have been swept or terminated; create a new one.")
    )]
    SessionNotFound { session_id: String },

    /// A session with this id is already registered.
    #[error("session already registered: {session_id}")]
    #[diagnostic(code(convoflow::sync::session_exists))]
    SessionExists { session_id: String },

    /// An update would violate the snapshot invariants. Fatal: indicates a
    /// handler bug, and the update is never persisted.
    #[error("state consistency violation for session {session_id}: {violation}")]
    #[diagnostic(
        code(convoflow::sync::state_consistency),
        help("A command handler produced an invalid partial update; fix the handler.")
    )]
    StateConsistency {
        session_id: String,
        #[source]
        violation: InvariantViolation,
    },
}

impl SyncError {
    /// None of the hub errors are retryable as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Hub tuning knobs.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Retained update events per session; FIFO eviction beyond this.
    pub history_limit: usize,
    /// Idle window after which a session counts as stale.
    pub stale_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            stale_after: Duration::from_secs(1800),
        }
    }
}

impl SyncConfig {
    /// Resolve configuration with environment overrides
    /// (`CONVOFLOW_STALE_AFTER_SECS`).
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(secs) = std::env::var("CONVOFLOW_STALE_AFTER_SECS")
            && let Ok(secs) = secs.parse::<u64>()
        {
            config.stale_after = Duration::from_secs(secs);
        }
        config
    }
}

/// Result of one committed update.
#[derive(Clone, Debug)]
pub struct CommittedUpdate {
    pub event: WorkflowUpdateEvent,
    pub state: SessionState,
    pub update_type: UpdateType,
    pub notified: bool,
}

/// Rolling broadcast statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct HubMetrics {
    pub updates: u64,
    /// Rolling mean of the commit+broadcast latency, in microseconds.
    pub avg_broadcast_micros: f64,
}

struct SlotInner {
    state: SessionState,
    history: VecDeque<WorkflowUpdateEvent>,
    subscribers: Vec<(u64, UpdateSubscriber)>,
    last_activity: Instant,
}

struct SessionSlot {
    inner: Mutex<SlotInner>,
    next_token: AtomicU64,
}

/// Handle returned by [`StateSyncHub::subscribe_to_session`].
///
/// Dropping the handle does NOT unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe) explicitly. The handle stays valid even
/// after the session is unregistered (unsubscribing then is a no-op).
pub struct Subscription {
    session_id: String,
    token: u64,
    slot: Weak<SessionSlot>,
}

impl Subscription {
    /// Stop receiving updates for this subscription.
    pub fn unsubscribe(self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.inner
                .lock()
                .subscribers
                .retain(|(token, _)| *token != self.token);
            debug!(session_id = %self.session_id, token = self.token, "unsubscribed");
        }
    }
}

/// Canonical per-session state owner and broadcast fan-out.
///
/// Construct explicit instances and share via `Arc`; independent hubs can
/// coexist (tests, tenant isolation) because nothing here is process-global.
pub struct StateSyncHub {
    sessions: RwLock<FxHashMap<String, Arc<SessionSlot>>>,
    config: SyncConfig,
    metrics: Mutex<HubMetrics>,
}

impl Default for StateSyncHub {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl StateSyncHub {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            config,
            metrics: Mutex::new(HubMetrics::default()),
        }
    }

    /// Register a new session with its initial snapshot.
    ///
    /// The initial snapshot is validated like any other update; a violating
    /// snapshot is rejected with [`SyncError::StateConsistency`] and nothing
    /// is stored. A silent `execution-started` event seeds the history
    /// buffer.
    pub fn register_session(
        &self,
        session_id: &str,
        initial: SessionState,
    ) -> Result<(), SyncError> {
        initial
            .validate()
            .map_err(|violation| SyncError::StateConsistency {
                session_id: session_id.to_string(),
                violation,
            })?;

        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            return Err(SyncError::SessionExists {
                session_id: session_id.to_string(),
            });
        }

        let seed = WorkflowUpdateEvent::for_snapshot(UpdateType::ExecutionStarted, &initial, false);
        let mut history = VecDeque::with_capacity(16);
        history.push_back(seed);

        sessions.insert(
            session_id.to_string(),
            Arc::new(SessionSlot {
                inner: Mutex::new(SlotInner {
                    state: initial,
                    history,
                    subscribers: Vec::new(),
                    last_activity: Instant::now(),
                }),
                next_token: AtomicU64::new(0),
            }),
        );
        debug!(session_id, "session registered");
        Ok(())
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, SyncError> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Apply a partial update to a session's canonical snapshot.
    ///
    /// Runs the full read-merge-validate-classify-commit-broadcast sequence
    /// under the session's slot lock. On an invariant violation nothing is
    /// committed and the error propagates; the previous snapshot stays
    /// canonical.
    pub fn update_session(
        &self,
        session_id: &str,
        patch: &StatePatch,
    ) -> Result<CommittedUpdate, SyncError> {
        let slot = self.slot(session_id)?;
        let started = Instant::now();

        let mut inner = slot.inner.lock();
        let prev = inner.state.clone();
        let next = prev.with_patch(patch);
        next.validate()
            .map_err(|violation| SyncError::StateConsistency {
                session_id: session_id.to_string(),
                violation,
            })?;

        let update_type = classify_transition(&prev, &next);
        let notified = should_notify(&prev, &next);
        let event = WorkflowUpdateEvent::for_snapshot(update_type, &next, notified);

        inner.state = next.clone();
        inner.history.push_back(event.clone());
        let limit = self.config.history_limit;
        while inner.history.len() > limit {
            inner.history.pop_front();
        }
        inner.last_activity = Instant::now();

        Self::deliver(&inner.subscribers, &event);
        drop(inner);

        self.record_latency(started.elapsed());
        Ok(CommittedUpdate {
            event,
            state: next,
            update_type,
            notified,
        })
    }

    /// Best-effort fan-out: a failing subscriber is logged and skipped,
    /// delivery to the rest continues, and the caller never sees the error.
    fn deliver(subscribers: &[(u64, UpdateSubscriber)], event: &WorkflowUpdateEvent) {
        for (token, subscriber) in subscribers {
            if let Err(err) = subscriber(event.clone()) {
                warn!(
                    session_id = %event.session_id,
                    token,
                    error = %err,
                    "subscriber delivery failed"
                );
            }
        }
    }

    /// Current canonical snapshot for a session.
    #[must_use]
    pub fn get_state(&self, session_id: &str) -> Option<SessionState> {
        let slot = self.sessions.read().get(session_id).cloned()?;
        let inner = slot.inner.lock();
        Some(inner.state.clone())
    }

    /// Retained update history for a session, oldest first.
    #[must_use]
    pub fn history(&self, session_id: &str) -> Option<Vec<WorkflowUpdateEvent>> {
        let slot = self.sessions.read().get(session_id).cloned()?;
        let inner = slot.inner.lock();
        Some(inner.history.iter().cloned().collect())
    }

    /// Subscribe a callback to a session's committed updates.
    pub fn subscribe_to_session(
        &self,
        session_id: &str,
        subscriber: UpdateSubscriber,
    ) -> Result<Subscription, SyncError> {
        let slot = self.slot(session_id)?;
        let token = slot.next_token.fetch_add(1, Ordering::Relaxed);
        slot.inner.lock().subscribers.push((token, subscriber));
        Ok(Subscription {
            session_id: session_id.to_string(),
            token,
            slot: Arc::downgrade(&slot),
        })
    }

    /// Subscribe through a channel instead of a callback.
    ///
    /// Useful for forwarding updates to async consumers (SSE endpoints, web
    /// sockets). The channel is unbounded; a dropped receiver shows up as
    /// logged delivery failures until the subscription is unsubscribed or the
    /// session ends.
    pub fn subscribe_channel(
        &self,
        session_id: &str,
    ) -> Result<(Subscription, flume::Receiver<WorkflowUpdateEvent>), SyncError> {
        let (tx, rx) = flume::unbounded();
        let subscription = self.subscribe_to_session(
            session_id,
            Arc::new(move |event| {
                tx.send(event)
                    .map_err(|_| RealtimeDeliveryError("channel receiver dropped".into()))
            }),
        )?;
        Ok((subscription, rx))
    }

    /// Subscribe as an async stream, for `while let Some(event) = ...`
    /// consumption.
    ///
    /// The stream ends when the subscription is dropped server-side (session
    /// unregistered and the sender released).
    pub fn subscribe_stream(
        &self,
        session_id: &str,
    ) -> Result<(Subscription, impl Stream<Item = WorkflowUpdateEvent> + use<>), SyncError> {
        let (subscription, rx) = self.subscribe_channel(session_id)?;
        let stream = stream::unfold(rx, |rx| async move {
            rx.recv_async().await.ok().map(|event| (event, rx))
        });
        Ok((subscription, stream))
    }

    /// Unregister a session: emits a terminal event to current subscribers,
    /// then discards snapshot, history, and the subscriber set.
    ///
    /// Returns `false` when the session was already gone (best-effort
    /// semantics; terminating twice is not an error).
    pub fn unregister_session(&self, session_id: &str) -> bool {
        let Some(slot) = self.sessions.write().remove(session_id) else {
            return false;
        };
        let inner = slot.inner.lock();
        let terminal_type = match inner.state.execution_status {
            ExecutionStatus::Completed => UpdateType::ExecutionCompleted,
            ExecutionStatus::Failed => UpdateType::ExecutionFailed,
            _ => UpdateType::ExecutionCancelled,
        };
        let event = WorkflowUpdateEvent::for_snapshot(terminal_type, &inner.state, false);
        Self::deliver(&inner.subscribers, &event);
        debug!(session_id, "session unregistered");
        true
    }

    /// Session ids idle longer than `threshold`.
    ///
    /// The hub itself does not sweep; the orchestrator owns the single
    /// authoritative sweep and terminates stale sessions through
    /// [`unregister_session`](Self::unregister_session).
    #[must_use]
    pub fn stale_sessions(&self, threshold: Duration) -> Vec<String> {
        let sessions = self.sessions.read();
        sessions
            .iter()
            .filter(|(_, slot)| slot.inner.lock().last_activity.elapsed() > threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Mark a session as recently active without mutating its snapshot.
    pub fn touch(&self, session_id: &str) {
        if let Some(slot) = self.sessions.read().get(session_id) {
            slot.inner.lock().last_activity = Instant::now();
        }
    }

    /// Configured staleness window.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.config.stale_after
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot of the rolling broadcast statistics.
    #[must_use]
    pub fn metrics(&self) -> HubMetrics {
        *self.metrics.lock()
    }

    fn record_latency(&self, elapsed: Duration) {
        let mut metrics = self.metrics.lock();
        metrics.updates += 1;
        let sample = elapsed.as_micros() as f64;
        let n = metrics.updates as f64;
        metrics.avg_broadcast_micros += (sample - metrics.avg_broadcast_micros) / n;
    }
}
