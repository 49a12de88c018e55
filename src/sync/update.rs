//! Broadcast update events and transition classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::state::SessionState;
use crate::types::{ExecutionStatus, UpdateType};

/// One broadcastable state change, as delivered to subscribers and retained
/// in the per-session history buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowUpdateEvent {
    pub update_id: String,
    pub workflow_id: String,
    pub session_id: String,
    pub update_type: UpdateType,
    pub timestamp: DateTime<Utc>,
    /// Sanitized execution details (status, progress counters, current node).
    pub data: Value,
    /// Short human-facing description, when the change warrants one.
    pub user_message: Option<String>,
    /// Agent-voice counterpart of `user_message`.
    pub agent_message: Option<String>,
    pub show_notification: bool,
}

impl WorkflowUpdateEvent {
    /// Build an event for a committed snapshot.
    ///
    /// The `data` payload is derived from the snapshot and deliberately
    /// excludes `contexts`: user-supplied values do not belong in the
    /// retained history.
    #[must_use]
    pub fn for_snapshot(
        update_type: UpdateType,
        state: &SessionState,
        show_notification: bool,
    ) -> Self {
        Self {
            update_id: Uuid::new_v4().to_string(),
            workflow_id: state.workflow_id.clone(),
            session_id: state.session_id.clone(),
            update_type,
            timestamp: Utc::now(),
            data: sanitized_data(state),
            user_message: None,
            agent_message: None,
            show_notification,
        }
    }

    #[must_use]
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_agent_message(mut self, message: impl Into<String>) -> Self {
        self.agent_message = Some(message.into());
        self
    }
}

fn sanitized_data(state: &SessionState) -> Value {
    json!({
        "execution_status": state.execution_status,
        "current_node_id": state.current_node_id,
        "completed": state.completed_count(),
        "failed": state.failed_nodes().len(),
        "skipped": state.skipped_nodes().len(),
        "total": state.total_nodes,
        "awaiting_user_input": state.awaiting_user_input,
        "error_count": state.error_count,
    })
}

/// Classify a committed transition by diffing the previous and next
/// snapshots.
///
/// Pure function: identical inputs always yield the same [`UpdateType`].
/// Status changes dominate; node-level outcome changes rank next; an
/// `awaiting_user_input` toggle without a status change reports
/// `input-required`; anything else is a plain progress update.
#[must_use]
pub fn classify_transition(prev: &SessionState, next: &SessionState) -> UpdateType {
    use ExecutionStatus as S;

    if prev.execution_status != next.execution_status {
        return match next.execution_status {
            S::Running => match prev.execution_status {
                S::Paused | S::WaitingForInput => UpdateType::ExecutionResumed,
                _ => UpdateType::ExecutionStarted,
            },
            S::Paused => UpdateType::ExecutionPaused,
            S::WaitingForInput => UpdateType::InputRequired,
            S::Completed => UpdateType::ExecutionCompleted,
            S::Failed => UpdateType::ExecutionFailed,
            S::Cancelled => UpdateType::ExecutionCancelled,
            S::NotStarted => UpdateType::ProgressUpdate,
        };
    }
    if next.failed_nodes().len() > prev.failed_nodes().len() {
        return UpdateType::NodeFailed;
    }
    if next.completed_count() > prev.completed_count() {
        return UpdateType::NodeCompleted;
    }
    if prev.current_node_id != next.current_node_id {
        return UpdateType::NodeStarted;
    }
    if !prev.awaiting_user_input && next.awaiting_user_input {
        return UpdateType::InputRequired;
    }
    UpdateType::ProgressUpdate
}

/// Decide whether a committed transition deserves a user-visible
/// notification.
///
/// Worthy: any status change, a newly recorded error, an
/// `awaiting_user_input` toggle, or a new node completion.
#[must_use]
pub fn should_notify(prev: &SessionState, next: &SessionState) -> bool {
    prev.execution_status != next.execution_status
        || next.error_count > prev.error_count
        || prev.awaiting_user_input != next.awaiting_user_input
        || next.completed_count() > prev.completed_count()
}
