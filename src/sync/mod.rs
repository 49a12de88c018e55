//! Real-time state synchronization: canonical session snapshots, partial
//! updates, transition classification, and subscriber broadcast.
//!
//! The hub is the sole writer of canonical [`state::SessionState`]; everything
//! else in the crate goes through [`hub::StateSyncHub::update_session`].

pub mod hub;
pub mod state;
pub mod update;

pub use hub::{
    CommittedUpdate, HubMetrics, RealtimeDeliveryError, StateSyncHub, Subscription, SyncConfig,
    SyncError, UpdateSubscriber,
};
pub use state::{InvariantViolation, SessionState, StatePatch};
pub use update::{WorkflowUpdateEvent, classify_transition, should_notify};
