//! Workflow graph input model and the graph-store collaborator seam.
//!
//! Graphs are authored elsewhere (a visual editor) and loaded read-only
//! through [`GraphStore`]. This crate never mutates a graph; it only scans
//! nodes and edges to derive a conversational journey.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step in a visually-authored workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    /// Authoring-tool type string, e.g. `"httpRequest"` or `"scheduleTrigger"`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display name shown to the user in prompts; falls back to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque authoring payload (parameters, positions, credentials refs).
    #[serde(default)]
    pub data: Value,
}

impl GraphNode {
    /// Human-facing label: the display name when present, else the id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One connector between two workflow steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    /// Optional edge payload; a `"condition"` key becomes the transition
    /// trigger condition instead of the default "previous step completed".
    #[serde(default)]
    pub data: Value,
}

impl GraphEdge {
    /// Explicit trigger condition carried by the edge, if any.
    #[must_use]
    pub fn condition(&self) -> Option<&str> {
        self.data.get("condition").and_then(Value::as_str)
    }
}

/// A complete workflow graph as supplied by the external store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Node ids with no incoming edge, in declaration order.
    #[must_use]
    pub fn entry_points(&self) -> Vec<&str> {
        let mut incoming: FxHashMap<&str, usize> = FxHashMap::default();
        for node in &self.nodes {
            incoming.insert(node.id.as_str(), 0);
        }
        for edge in &self.edges {
            if let Some(count) = incoming.get_mut(edge.target.as_str()) {
                *count += 1;
            }
        }
        self.nodes
            .iter()
            .filter(|n| incoming.get(n.id.as_str()).copied() == Some(0))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Node ids with no outgoing edge, in declaration order.
    #[must_use]
    pub fn exit_points(&self) -> Vec<&str> {
        let mut outgoing: FxHashMap<&str, usize> = FxHashMap::default();
        for node in &self.nodes {
            outgoing.insert(node.id.as_str(), 0);
        }
        for edge in &self.edges {
            if let Some(count) = outgoing.get_mut(edge.source.as_str()) {
                *count += 1;
            }
        }
        self.nodes
            .iter()
            .filter(|n| outgoing.get(n.id.as_str()).copied() == Some(0))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of `id`, in declaration order.
    #[must_use]
    pub fn outgoing(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }
}

/// Read-only access to externally stored workflow graphs.
///
/// Implementations live outside this crate (HTTP clients, databases, test
/// fixtures). Returning `Ok(None)` means the workflow id is unknown for the
/// tenant; transport failures should be surfaced through the error type.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn load_graph(
        &self,
        workflow_id: &str,
        tenant: &str,
    ) -> Result<Option<WorkflowGraph>, GraphStoreError>;
}

/// Failure reported by a [`GraphStore`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("graph store error: {message}")]
pub struct GraphStoreError {
    pub message: String,
    /// Whether the caller may retry the load.
    pub retryable: bool,
}

impl GraphStoreError {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> WorkflowGraph {
        WorkflowGraph {
            nodes: vec![
                GraphNode {
                    id: "a".into(),
                    node_type: "manualTrigger".into(),
                    name: Some("Start".into()),
                    data: Value::Null,
                },
                GraphNode {
                    id: "b".into(),
                    node_type: "set".into(),
                    name: None,
                    data: Value::Null,
                },
                GraphNode {
                    id: "c".into(),
                    node_type: "emailSend".into(),
                    name: None,
                    data: Value::Null,
                },
            ],
            edges: vec![
                GraphEdge {
                    source: "a".into(),
                    target: "b".into(),
                    data: Value::Null,
                },
                GraphEdge {
                    source: "b".into(),
                    target: "c".into(),
                    data: json!({"condition": "items > 0"}),
                },
            ],
        }
    }

    #[test]
    fn entry_and_exit_points() {
        let g = graph();
        assert_eq!(g.entry_points(), vec!["a"]);
        assert_eq!(g.exit_points(), vec!["c"]);
    }

    #[test]
    fn edge_condition_extraction() {
        let g = graph();
        assert_eq!(g.edges[0].condition(), None);
        assert_eq!(g.edges[1].condition(), Some("items > 0"));
    }

    #[test]
    fn label_falls_back_to_id() {
        let g = graph();
        assert_eq!(g.nodes[0].label(), "Start");
        assert_eq!(g.nodes[1].label(), "b");
    }
}
