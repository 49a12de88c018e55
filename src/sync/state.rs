//! Canonical per-session execution snapshot and the partial-update patch.
//!
//! [`SessionState`] is only ever mutated by [`crate::sync::hub::StateSyncHub`]
//! applying a [`StatePatch`]; command handlers build patches, they never touch
//! the snapshot directly. Invariants are validated on every merge and on
//! registration; a violation is fatal and the offending patch is never
//! persisted.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ExecutionStatus, NodeOutcome};

/// Live execution snapshot for one conversational session.
///
/// Node resolutions live in a single outcome map, so a node id can hold at
/// most one of completed/failed/skipped. The list-style views
/// ([`completed_nodes`](Self::completed_nodes) etc.) are disjoint projections
/// of that map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub workflow_id: String,
    pub journey_id: String,
    pub session_id: String,
    /// The conversational state the walk currently sits on, if any.
    pub current_node_id: Option<String>,
    pub execution_status: ExecutionStatus,
    /// Resolution per node id; absent means the node is still pending.
    pub node_outcomes: FxHashMap<String, NodeOutcome>,
    /// Node count of the mapped journey; fixed at registration.
    pub total_nodes: usize,
    /// Accumulated user-supplied values and step context, keyed by name.
    pub contexts: FxHashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub awaiting_user_input: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl SessionState {
    /// Fresh `not-started` snapshot for a newly created session.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        journey_id: impl Into<String>,
        session_id: impl Into<String>,
        total_nodes: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            journey_id: journey_id.into(),
            session_id: session_id.into(),
            current_node_id: None,
            execution_status: ExecutionStatus::NotStarted,
            node_outcomes: FxHashMap::default(),
            total_nodes,
            contexts: FxHashMap::default(),
            started_at: now,
            updated_at: now,
            awaiting_user_input: true,
            error_count: 0,
            last_error: None,
        }
    }

    fn nodes_with(&self, outcome: NodeOutcome) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .node_outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Node ids that ran to completion, sorted.
    #[must_use]
    pub fn completed_nodes(&self) -> Vec<&str> {
        self.nodes_with(NodeOutcome::Completed)
    }

    /// Node ids whose last run failed, sorted.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.nodes_with(NodeOutcome::Failed)
    }

    /// Node ids the user waived, sorted.
    #[must_use]
    pub fn skipped_nodes(&self) -> Vec<&str> {
        self.nodes_with(NodeOutcome::Skipped)
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.node_outcomes
            .values()
            .filter(|o| **o == NodeOutcome::Completed)
            .count()
    }

    /// Nodes resolved one way or another (completed, failed, or skipped).
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.node_outcomes.len()
    }

    /// Completion fraction in `[0, 1]`; zero-node journeys report 1.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total_nodes == 0 {
            return 1.0;
        }
        self.completed_count() as f64 / self.total_nodes as f64
    }

    /// Check the snapshot invariants.
    ///
    /// Called by the hub before any snapshot becomes canonical. Violations
    /// indicate a handler bug and must never be silently persisted.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let completed = self.completed_count();
        if completed > self.total_nodes {
            return Err(InvariantViolation::CompletedExceedsTotal {
                completed,
                total: self.total_nodes,
            });
        }
        if self.node_outcomes.len() > self.total_nodes {
            return Err(InvariantViolation::OutcomesExceedTotal {
                outcomes: self.node_outcomes.len(),
                total: self.total_nodes,
            });
        }
        if self.execution_status == ExecutionStatus::Completed && completed != self.total_nodes {
            return Err(InvariantViolation::PrematureCompletion {
                completed,
                total: self.total_nodes,
            });
        }
        Ok(())
    }

    /// Produce the snapshot that results from applying `patch`.
    ///
    /// The receiver is untouched; the hub only commits the returned copy
    /// after it validates.
    #[must_use]
    pub fn with_patch(&self, patch: &StatePatch) -> Self {
        let mut next = self.clone();
        if let Some(status) = patch.execution_status {
            next.execution_status = status;
        }
        if let Some(current) = &patch.current_node_id {
            next.current_node_id = current.clone();
        }
        for node_id in &patch.clear_outcomes {
            next.node_outcomes.remove(node_id);
        }
        for (node_id, outcome) in &patch.node_outcomes {
            next.node_outcomes.insert(node_id.clone(), *outcome);
        }
        for (key, value) in &patch.contexts {
            next.contexts.insert(key.clone(), value.clone());
        }
        if let Some(awaiting) = patch.awaiting_user_input {
            next.awaiting_user_input = awaiting;
        }
        if let Some(error) = &patch.record_error {
            next.error_count += 1;
            next.last_error = Some(error.clone());
        }
        next.updated_at = Utc::now();
        next
    }
}

/// Partial state update produced by a command handler.
///
/// All fields are optional; an empty patch means the command was a no-op and
/// the orchestrator skips the hub entirely (repeated `get-status` must not
/// mutate the session).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatePatch {
    pub execution_status: Option<ExecutionStatus>,
    /// `Some(None)` clears the current node; `None` leaves it untouched.
    pub current_node_id: Option<Option<String>>,
    /// Outcomes to upsert.
    pub node_outcomes: Vec<(String, NodeOutcome)>,
    /// Outcomes to clear (retry returns a failed node to pending).
    pub clear_outcomes: Vec<String>,
    pub contexts: FxHashMap<String, Value>,
    pub awaiting_user_input: Option<bool>,
    /// Records a handler failure: bumps `error_count`, sets `last_error`.
    pub record_error: Option<String>,
}

impl StatePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.execution_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_current_node(mut self, node_id: Option<String>) -> Self {
        self.current_node_id = Some(node_id);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, node_id: impl Into<String>, outcome: NodeOutcome) -> Self {
        self.node_outcomes.push((node_id.into(), outcome));
        self
    }

    #[must_use]
    pub fn with_cleared_outcome(mut self, node_id: impl Into<String>) -> Self {
        self.clear_outcomes.push(node_id.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.contexts.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_awaiting_input(mut self, awaiting: bool) -> Self {
        self.awaiting_user_input = Some(awaiting);
        self
    }

    #[must_use]
    pub fn with_recorded_error(mut self, message: impl Into<String>) -> Self {
        self.record_error = Some(message.into());
        self
    }

    /// True when applying the patch would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.execution_status.is_none()
            && self.current_node_id.is_none()
            && self.node_outcomes.is_empty()
            && self.clear_outcomes.is_empty()
            && self.contexts.is_empty()
            && self.awaiting_user_input.is_none()
            && self.record_error.is_none()
    }
}

/// A snapshot invariant that an update attempted to violate.
///
/// Wrapped by the hub into its fatal `StateConsistency` error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("completed node count {completed} exceeds total {total}")]
    CompletedExceedsTotal { completed: usize, total: usize },

    #[error("{outcomes} node outcomes recorded against {total} total nodes")]
    OutcomesExceedTotal { outcomes: usize, total: usize },

    #[error("status is 'completed' but only {completed} of {total} nodes completed")]
    PrematureCompletion { completed: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new("wf-1", "journey-1", "sess-1", 3)
    }

    #[test]
    fn fresh_state_is_valid() {
        let s = state();
        assert_eq!(s.execution_status, ExecutionStatus::NotStarted);
        assert!(s.awaiting_user_input);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn patch_apply_is_copy_on_write() {
        let s = state();
        let patched = s.with_patch(
            &StatePatch::new()
                .with_status(ExecutionStatus::Running)
                .with_outcome("n1", NodeOutcome::Completed),
        );
        assert_eq!(s.execution_status, ExecutionStatus::NotStarted);
        assert_eq!(patched.execution_status, ExecutionStatus::Running);
        assert_eq!(patched.completed_nodes(), vec!["n1"]);
        assert!(patched.updated_at >= s.updated_at);
    }

    #[test]
    fn outcome_map_keeps_lists_disjoint() {
        let s = state().with_patch(
            &StatePatch::new()
                .with_outcome("n1", NodeOutcome::Failed)
                .with_outcome("n1", NodeOutcome::Completed),
        );
        assert_eq!(s.completed_nodes(), vec!["n1"]);
        assert!(s.failed_nodes().is_empty());
    }

    #[test]
    fn premature_completion_is_a_violation() {
        let s = state().with_patch(
            &StatePatch::new()
                .with_status(ExecutionStatus::Completed)
                .with_outcome("n1", NodeOutcome::Completed),
        );
        assert!(matches!(
            s.validate(),
            Err(InvariantViolation::PrematureCompletion { completed: 1, total: 3 })
        ));
    }

    #[test]
    fn clear_outcome_supports_retry() {
        let failed = state().with_patch(&StatePatch::new().with_outcome("n2", NodeOutcome::Failed));
        let retried = failed.with_patch(&StatePatch::new().with_cleared_outcome("n2"));
        assert!(retried.failed_nodes().is_empty());
        assert_eq!(retried.resolved_count(), 0);
    }

    #[test]
    fn empty_patch_detection() {
        assert!(StatePatch::new().is_empty());
        assert!(!StatePatch::new().with_awaiting_input(false).is_empty());
    }
}
