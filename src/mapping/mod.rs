//! Graph-to-journey mapping: translating a visually-authored workflow graph
//! into a versioned conversational state machine.
//!
//! The [`mapper::GraphToJourneyMapper`] pulls graphs from the external
//! [`crate::graph::GraphStore`] and registers the generated journey with the
//! external [`AgentRuntime`], caching one active mapping per workflow id.

pub mod journey;
pub mod mapper;

use async_trait::async_trait;
use serde_json::Value;

pub use journey::{ContextMapping, EdgeTransitionMapping, JourneyMapping, NodeStateMapping};
pub use mapper::{GraphToJourneyMapper, MapperError, MappingOptions};

/// The external conversational-AI runtime that hosts journeys.
///
/// `create_journey` persists the generated state machine and returns the
/// journey id under which the runtime hosts it. Implementations live outside
/// this crate.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn create_journey(
        &self,
        states: &[NodeStateMapping],
        transitions: &[EdgeTransitionMapping],
        metadata: Value,
    ) -> Result<String, AgentRuntimeError>;
}

/// Failure reported by an [`AgentRuntime`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("agent runtime error: {message}")]
pub struct AgentRuntimeError {
    pub message: String,
    pub retryable: bool,
}

impl AgentRuntimeError {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}
