//! Journey definition types: the conversational state-machine form of a
//! workflow graph.
//!
//! A [`JourneyMapping`] is created once per workflow version and never
//! mutated; graph changes supersede it with a bumped version through the
//! mapper's cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::config::{ConversationalConfig, ExecutionConfig};
use crate::types::{ExecutionTrigger, NodeCategory};

/// One workflow node mapped to one conversational state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeStateMapping {
    pub node_id: String,
    /// Deterministic journey-state id derived from workflow and node ids.
    pub journey_state_id: String,
    pub display_name: String,
    pub category: NodeCategory,
    /// Prompt spoken when the walk enters this state.
    pub entry_prompt: String,
    pub execution_trigger: ExecutionTrigger,
    pub is_start_state: bool,
    pub is_end_state: bool,
    /// Human-readable preconditions checked before the state resolves.
    pub validation_rules: Vec<String>,
}

/// One workflow edge mapped to one conversational transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeTransitionMapping {
    pub source: String,
    pub target: String,
    /// Trigger condition; defaults to "previous step completed" when the
    /// edge carries no explicit condition.
    pub condition: String,
    pub requires_confirmation: bool,
}

/// Maps a user-input state's collected value into a named context variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextMapping {
    pub node_id: String,
    pub context_key: String,
}

/// A workflow graph translated into a versioned conversational journey.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JourneyMapping {
    pub workflow_id: String,
    pub tenant: String,
    /// Journey id assigned by the agent runtime that hosts the journey.
    pub journey_id: String,
    /// Monotonically increasing per workflow; bumped on every re-mapping.
    pub version: u32,
    pub node_states: Vec<NodeStateMapping>,
    pub edge_transitions: Vec<EdgeTransitionMapping>,
    pub context_mappings: Vec<ContextMapping>,
    pub conversational: ConversationalConfig,
    pub execution: ExecutionConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl JourneyMapping {
    /// Number of mapped conversational states.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_states.len()
    }

    /// The unique start state, if the mapping has one.
    #[must_use]
    pub fn start_state(&self) -> Option<&NodeStateMapping> {
        self.node_states.iter().find(|s| s.is_start_state)
    }

    /// State mapped from `node_id`.
    #[must_use]
    pub fn state_for_node(&self, node_id: &str) -> Option<&NodeStateMapping> {
        self.node_states.iter().find(|s| s.node_id == node_id)
    }

    /// Transitions leaving `node_id`, in mapping order.
    #[must_use]
    pub fn transitions_from(&self, node_id: &str) -> Vec<&EdgeTransitionMapping> {
        self.edge_transitions
            .iter()
            .filter(|t| t.source == node_id)
            .collect()
    }

    /// Default next node: the first outgoing transition's target.
    #[must_use]
    pub fn default_next(&self, node_id: &str) -> Option<&str> {
        self.edge_transitions
            .iter()
            .find(|t| t.source == node_id)
            .map(|t| t.target.as_str())
    }

    /// Context key collected by `node_id`, if it is an input state.
    #[must_use]
    pub fn context_key_for(&self, node_id: &str) -> Option<&str> {
        self.context_mappings
            .iter()
            .find(|m| m.node_id == node_id)
            .map(|m| m.context_key.as_str())
    }
}
