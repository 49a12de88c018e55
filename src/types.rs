//! Core types for the convoflow execution core.
//!
//! This module defines the fundamental enums shared across the crate: the
//! session execution status machine, per-node outcomes, broadcast update
//! kinds, and the node categorization used when a workflow graph is mapped
//! into a conversational journey.
//!
//! For the live snapshot and patch types see [`crate::sync::state`]; for the
//! journey definition types see [`crate::mapping`].
//!
//! # Examples
//!
//! ```rust
//! use convoflow::types::{ExecutionStatus, NodeCategory, ExecutionTrigger};
//!
//! let status = ExecutionStatus::NotStarted;
//! assert!(status.can_start());
//! assert!(!status.is_terminal());
//!
//! // Node categories drive how a mapped state asks for progress
//! let category = NodeCategory::from_node_type("httpRequest");
//! assert_eq!(category, NodeCategory::External);
//! assert_eq!(category.execution_trigger(), ExecutionTrigger::UserConfirmation);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of one conversational workflow session.
///
/// Transitions follow a fixed machine:
///
/// ```text
/// not-started → running → {paused ⇄ running} → {completed | failed | cancelled}
///                  ↓
///          waiting-for-input → running
/// ```
///
/// Terminal states (`completed`, `failed`, `cancelled`) accept no further
/// lifecycle transitions; commands received in a terminal state degrade to
/// status reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    /// Session exists but the workflow has not been started yet.
    NotStarted,
    /// The workflow is actively advancing through its states.
    Running,
    /// Execution is suspended; `resume` picks up where it left off.
    Paused,
    /// The walk is blocked on user input or confirmation.
    WaitingForInput,
    /// Every node resolved successfully.
    Completed,
    /// Execution ended with an unrecoverable step failure.
    Failed,
    /// The user abandoned the run.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns `true` for `completed`, `failed`, and `cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` while the session can still make progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::WaitingForInput)
    }

    /// Only a fresh session may be started.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Self::NotStarted)
    }

    /// Stable kebab-case form used in logs, replies, and wire payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::WaitingForInput => "waiting-for-input",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution recorded for a single workflow node within a session.
///
/// A node id maps to at most one outcome; the outcome map in
/// [`crate::sync::state::SessionState`] makes conflicting memberships
/// (e.g. a node both completed and skipped) structurally impossible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeOutcome {
    /// The step ran to completion.
    Completed,
    /// The step failed; eligible for `retry-step`.
    Failed,
    /// The user deliberately waived the step.
    Skipped,
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Kind of change carried by one broadcast update.
///
/// Classification is a pure function of the previous and next snapshots; see
/// [`crate::sync::update::classify_transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateType {
    ExecutionStarted,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    InputRequired,
    ProgressUpdate,
}

impl UpdateType {
    /// Stable kebab-case form used in event payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution-started",
            Self::ExecutionPaused => "execution-paused",
            Self::ExecutionResumed => "execution-resumed",
            Self::ExecutionCompleted => "execution-completed",
            Self::ExecutionFailed => "execution-failed",
            Self::ExecutionCancelled => "execution-cancelled",
            Self::NodeStarted => "node-started",
            Self::NodeCompleted => "node-completed",
            Self::NodeFailed => "node-failed",
            Self::InputRequired => "input-required",
            Self::ProgressUpdate => "progress-update",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse category assigned to a workflow node when mapping it into a
/// conversational state.
///
/// The category decides the state's entry prompt and its
/// [`ExecutionTrigger`]. Categorization keys off the node's declared type
/// string, so graphs from different authoring tools normalize to the same
/// behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeCategory {
    /// Entry-point style nodes (manual triggers, schedules).
    Trigger,
    /// Plain business-logic steps.
    Action,
    /// Branching nodes; the user picks the path.
    Decision,
    /// Nodes that collect values from the user.
    UserInput,
    /// Side-effecting integrations (HTTP, mail, storage, ...).
    External,
    /// Pure data reshaping steps.
    Transform,
}

impl NodeCategory {
    /// Classify a raw node type string from the graph store.
    ///
    /// Matching is keyword-based and case-insensitive. Unknown types fall
    /// back to [`NodeCategory::Action`].
    #[must_use]
    pub fn from_node_type(node_type: &str) -> Self {
        let ty = node_type.to_ascii_lowercase();
        let has = |keys: &[&str]| keys.iter().any(|k| ty.contains(k));

        if has(&["trigger", "schedule", "cron", "manual", "start"]) {
            Self::Trigger
        } else if has(&["if", "switch", "router", "filter", "condition", "decision"]) {
            Self::Decision
        } else if has(&["form", "input", "prompt", "question", "wait"]) {
            Self::UserInput
        } else if has(&[
            "http", "webhook", "request", "api", "email", "mail", "slack", "database", "sql",
            "storage", "upload",
        ]) {
            Self::External
        } else if has(&["set", "transform", "function", "code", "merge", "split", "json"]) {
            Self::Transform
        } else {
            Self::Action
        }
    }

    /// How the mapped conversational state advances past this node.
    #[must_use]
    pub fn execution_trigger(&self) -> ExecutionTrigger {
        match self {
            Self::UserInput | Self::Decision => ExecutionTrigger::UserInput,
            Self::External => ExecutionTrigger::UserConfirmation,
            Self::Trigger | Self::Action | Self::Transform => ExecutionTrigger::Automatic,
        }
    }

    /// Side-effecting categories require confirmation before entry.
    #[must_use]
    pub fn is_side_effecting(&self) -> bool {
        matches!(self, Self::External)
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger => f.write_str("trigger"),
            Self::Action => f.write_str("action"),
            Self::Decision => f.write_str("decision"),
            Self::UserInput => f.write_str("user-input"),
            Self::External => f.write_str("external"),
            Self::Transform => f.write_str("transform"),
        }
    }
}

/// How execution proceeds past a mapped conversational state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionTrigger {
    /// Advances as soon as the previous state resolves.
    Automatic,
    /// Blocks until the user supplies values (`modify-input`).
    UserInput,
    /// Blocks until the user confirms (`resume`).
    UserConfirmation,
}

impl fmt::Display for ExecutionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => f.write_str("automatic"),
            Self::UserInput => f.write_str("user-input"),
            Self::UserConfirmation => f.write_str("user-confirmation"),
        }
    }
}
