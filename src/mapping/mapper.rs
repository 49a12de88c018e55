//! The graph→journey mapper and its per-workflow mapping cache.

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rustc_hash::FxHashMap;
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::journey::{
    ContextMapping, EdgeTransitionMapping, JourneyMapping, NodeStateMapping,
};
use super::{AgentRuntime, AgentRuntimeError};
use crate::graph::{GraphStore, GraphStoreError, WorkflowGraph};
use crate::session::config::{ConversationalConfig, ExecutionConfig};
use crate::types::NodeCategory;

/// Errors from graph→journey construction.
#[derive(Debug, Error, Diagnostic)]
pub enum MapperError {
    /// The graph store has no workflow under this id for the tenant.
    #[error("workflow not found: {workflow_id}")]
    #[diagnostic(
        code(convoflow::mapping::workflow_not_found),
        help("Check the workflow id and tenant; the workflow may have been deleted.")
    )]
    WorkflowNotFound { workflow_id: String },

    /// The graph loaded but contains no nodes to map.
    #[error("workflow {workflow_id} has no nodes")]
    #[diagnostic(code(convoflow::mapping::empty_graph))]
    EmptyGraph { workflow_id: String },

    /// The graph store failed to answer.
    #[error("graph load failed: {source}")]
    #[diagnostic(code(convoflow::mapping::graph_store))]
    GraphStore {
        #[source]
        source: GraphStoreError,
    },

    /// Journey-state creation against the agent runtime failed.
    #[error("journey creation failed: {source}")]
    #[diagnostic(code(convoflow::mapping::journey_creation))]
    JourneyCreation {
        #[source]
        source: AgentRuntimeError,
    },

    /// An outbound call exceeded its bound.
    #[error("{phase} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(convoflow::mapping::timeout),
        help("The collaborator may be overloaded; the call is safe to retry.")
    )]
    Timeout { phase: &'static str, timeout_ms: u64 },
}

impl MapperError {
    /// Whether retrying the operation can reasonably succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WorkflowNotFound { .. } | Self::EmptyGraph { .. } => false,
            Self::GraphStore { source } => source.retryable,
            Self::JourneyCreation { source } => source.retryable,
            Self::Timeout { .. } => true,
        }
    }

    /// Stable machine code, matching the diagnostic code.
    #[must_use]
    pub fn machine_code(&self) -> &'static str {
        match self {
            Self::WorkflowNotFound { .. } => "convoflow::mapping::workflow_not_found",
            Self::EmptyGraph { .. } => "convoflow::mapping::empty_graph",
            Self::GraphStore { .. } => "convoflow::mapping::graph_store",
            Self::JourneyCreation { .. } => "convoflow::mapping::journey_creation",
            Self::Timeout { .. } => "convoflow::mapping::timeout",
        }
    }
}

/// Per-call mapping options.
#[derive(Clone, Debug, Default)]
pub struct MappingOptions {
    pub conversational: ConversationalConfig,
    pub execution: ExecutionConfig,
    /// Bypass the cache and supersede any existing mapping.
    pub force_refresh: bool,
}

/// Converts workflow graphs into versioned conversational journeys.
///
/// Owns the in-memory mapping cache (one active mapping per workflow id).
/// A mapping is immutable once created; graph changes produce a superseding
/// mapping with a bumped version via [`invalidate`](Self::invalidate) or
/// `force_refresh`.
pub struct GraphToJourneyMapper {
    graph_store: Arc<dyn GraphStore>,
    agent_runtime: Arc<dyn AgentRuntime>,
    cache: RwLock<FxHashMap<String, Arc<JourneyMapping>>>,
    versions: Mutex<FxHashMap<String, u32>>,
}

impl GraphToJourneyMapper {
    #[must_use]
    pub fn new(graph_store: Arc<dyn GraphStore>, agent_runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            graph_store,
            agent_runtime,
            cache: RwLock::new(FxHashMap::default()),
            versions: Mutex::new(FxHashMap::default()),
        }
    }

    /// Active mapping for `workflow_id`, creating one on first use.
    pub async fn active_mapping(
        &self,
        workflow_id: &str,
        tenant: &str,
        requester: &str,
        options: &MappingOptions,
    ) -> Result<Arc<JourneyMapping>, MapperError> {
        if !options.force_refresh
            && let Some(mapping) = self.cache.read().get(workflow_id)
        {
            debug!(workflow_id, version = mapping.version, "mapping cache hit");
            return Ok(Arc::clone(mapping));
        }
        self.create_mapping(workflow_id, tenant, requester, options)
            .await
    }

    /// Build (and cache) a fresh mapping, retrying per the configured policy.
    ///
    /// Retries apply only to retryable failures whose machine code the
    /// policy allows; delays follow the backoff schedule plus jitter.
    #[instrument(skip(self, options), fields(tenant = %tenant))]
    pub async fn create_mapping(
        &self,
        workflow_id: &str,
        tenant: &str,
        requester: &str,
        options: &MappingOptions,
    ) -> Result<Arc<JourneyMapping>, MapperError> {
        let policy = &options.execution.retry_policy;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.map_once(workflow_id, tenant, requester, options).await {
                Ok(mapping) => return Ok(mapping),
                Err(err)
                    if attempt < policy.max_attempts
                        && err.is_retryable()
                        && policy.allows(err.machine_code()) =>
                {
                    let delay = jittered(policy.delay_for_attempt(attempt + 1));
                    warn!(
                        workflow_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "mapping attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn map_once(
        &self,
        workflow_id: &str,
        tenant: &str,
        requester: &str,
        options: &MappingOptions,
    ) -> Result<Arc<JourneyMapping>, MapperError> {
        let bound = options.execution.timeout();
        let timeout_ms = options.execution.timeout_ms;

        let graph = timeout(bound, self.graph_store.load_graph(workflow_id, tenant))
            .await
            .map_err(|_| MapperError::Timeout {
                phase: "graph load",
                timeout_ms,
            })?
            .map_err(|source| MapperError::GraphStore { source })?
            .ok_or_else(|| MapperError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        if graph.nodes.is_empty() {
            return Err(MapperError::EmptyGraph {
                workflow_id: workflow_id.to_string(),
            });
        }

        let (node_states, context_mappings) = build_node_states(workflow_id, &graph);
        let edge_transitions = build_edge_transitions(&graph);

        let metadata = json!({
            "workflow_id": workflow_id,
            "tenant": tenant,
            "requester": requester,
            "node_count": node_states.len(),
        });
        let journey_id = timeout(
            bound,
            self.agent_runtime
                .create_journey(&node_states, &edge_transitions, metadata),
        )
        .await
        .map_err(|_| MapperError::Timeout {
            phase: "journey creation",
            timeout_ms,
        })?
        .map_err(|source| MapperError::JourneyCreation { source })?;

        let version = {
            let mut versions = self.versions.lock();
            let slot = versions.entry(workflow_id.to_string()).or_insert(0);
            *slot += 1;
            *slot
        };

        let mapping = Arc::new(JourneyMapping {
            workflow_id: workflow_id.to_string(),
            tenant: tenant.to_string(),
            journey_id,
            version,
            node_states,
            edge_transitions,
            context_mappings,
            conversational: options.conversational.clone(),
            execution: options.execution.clone(),
            is_active: true,
            created_at: chrono::Utc::now(),
        });

        self.cache
            .write()
            .insert(workflow_id.to_string(), Arc::clone(&mapping));
        info!(
            workflow_id,
            journey_id = %mapping.journey_id,
            version,
            states = mapping.node_states.len(),
            transitions = mapping.edge_transitions.len(),
            "journey mapping created"
        );
        Ok(mapping)
    }

    /// Drop the cached mapping; the next session re-maps with a bumped
    /// version.
    pub fn invalidate(&self, workflow_id: &str) {
        if self.cache.write().remove(workflow_id).is_some() {
            debug!(workflow_id, "mapping invalidated");
        }
    }

    /// Cached mapping, if one is active.
    #[must_use]
    pub fn cached_mapping(&self, workflow_id: &str) -> Option<Arc<JourneyMapping>> {
        self.cache.read().get(workflow_id).cloned()
    }
}

fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let spread = (base.as_millis() as u64 / 4).max(1);
    base + Duration::from_millis(rand::rng().random_range(0..spread))
}

/// Deterministic journey-state id for a node.
fn journey_state_id(workflow_id: &str, node_id: &str) -> String {
    format!("state-{workflow_id}-{node_id}")
}

fn entry_prompt(category: NodeCategory, label: &str) -> String {
    match category {
        NodeCategory::Trigger => format!("Starting from \"{label}\"."),
        NodeCategory::Action => format!("Working on \"{label}\"."),
        NodeCategory::Decision => {
            format!("\"{label}\" needs a decision. Which path should we take?")
        }
        NodeCategory::UserInput => format!("\"{label}\" needs some input from you."),
        NodeCategory::External => {
            format!("\"{label}\" will contact an external service. Say resume to proceed.")
        }
        NodeCategory::Transform => format!("Reshaping data in \"{label}\"."),
    }
}

fn validation_rules(category: NodeCategory) -> Vec<String> {
    match category {
        NodeCategory::UserInput => vec!["required input values supplied".to_string()],
        NodeCategory::Decision => vec!["a branch was selected".to_string()],
        NodeCategory::External => vec!["user confirmed the external call".to_string()],
        _ => Vec::new(),
    }
}

/// Derive a context key from a node label: lowercase, non-alphanumerics
/// collapsed to underscores.
fn context_key(label: &str) -> String {
    let mut key = String::with_capacity(label.len());
    let mut last_underscore = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            key.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore && !key.is_empty() {
            key.push('_');
            last_underscore = true;
        }
    }
    while key.ends_with('_') {
        key.pop();
    }
    if key.is_empty() { "input".to_string() } else { key }
}

fn build_node_states(
    workflow_id: &str,
    graph: &WorkflowGraph,
) -> (Vec<NodeStateMapping>, Vec<ContextMapping>) {
    let entries = graph.entry_points();
    let exits = graph.exit_points();
    // Exactly one start state: the first entry point, or the first node when
    // every node has an incoming edge (cyclic authoring artifacts).
    let start_id = entries
        .first()
        .copied()
        .or_else(|| graph.nodes.first().map(|n| n.id.as_str()));

    let mut states = Vec::with_capacity(graph.nodes.len());
    let mut contexts = Vec::new();
    for node in &graph.nodes {
        let category = NodeCategory::from_node_type(&node.node_type);
        let label = node.label();
        if category.execution_trigger() == crate::types::ExecutionTrigger::UserInput {
            contexts.push(ContextMapping {
                node_id: node.id.clone(),
                context_key: context_key(label),
            });
        }
        states.push(NodeStateMapping {
            node_id: node.id.clone(),
            journey_state_id: journey_state_id(workflow_id, &node.id),
            display_name: label.to_string(),
            category,
            entry_prompt: entry_prompt(category, label),
            execution_trigger: category.execution_trigger(),
            is_start_state: Some(node.id.as_str()) == start_id,
            is_end_state: exits.contains(&node.id.as_str()),
            validation_rules: validation_rules(category),
        });
    }
    (states, contexts)
}

const DEFAULT_CONDITION: &str = "previous step completed";

fn build_edge_transitions(graph: &WorkflowGraph) -> Vec<EdgeTransitionMapping> {
    graph
        .edges
        .iter()
        .map(|edge| {
            let source_category = graph
                .node(&edge.source)
                .map(|n| NodeCategory::from_node_type(&n.node_type));
            let target_category = graph
                .node(&edge.target)
                .map(|n| NodeCategory::from_node_type(&n.node_type));
            let requires_confirmation = target_category
                .is_some_and(|c| c.is_side_effecting())
                || source_category == Some(NodeCategory::Decision);
            EdgeTransitionMapping {
                source: edge.source.clone(),
                target: edge.target.clone(),
                condition: edge
                    .condition()
                    .unwrap_or(DEFAULT_CONDITION)
                    .to_string(),
                requires_confirmation,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_key_normalization() {
        assert_eq!(context_key("Customer Email"), "customer_email");
        assert_eq!(context_key("  odd -- label!"), "odd_label");
        assert_eq!(context_key("!!!"), "input");
    }

    #[test]
    fn state_ids_are_deterministic() {
        assert_eq!(journey_state_id("wf", "n1"), journey_state_id("wf", "n1"));
        assert_ne!(journey_state_id("wf", "n1"), journey_state_id("wf", "n2"));
    }
}
