//! Shared fixtures and in-memory collaborators for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use convoflow::graph::{GraphEdge, GraphNode, GraphStore, GraphStoreError, WorkflowGraph};
use convoflow::intent::IntentRouter;
use convoflow::mapping::{
    AgentRuntime, AgentRuntimeError, EdgeTransitionMapping, GraphToJourneyMapper, NodeStateMapping,
};
use convoflow::session::{OrchestratorConfig, SessionOrchestrator};
use convoflow::sync::{StateSyncHub, SyncConfig, UpdateSubscriber, WorkflowUpdateEvent};

#[allow(dead_code)]
pub fn node(id: &str, node_type: &str, name: &str) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        node_type: node_type.to_string(),
        name: Some(name.to_string()),
        data: Value::Null,
    }
}

#[allow(dead_code)]
pub fn edge(source: &str, target: &str) -> GraphEdge {
    GraphEdge {
        source: source.to_string(),
        target: target.to_string(),
        data: Value::Null,
    }
}

#[allow(dead_code)]
pub fn conditional_edge(source: &str, target: &str, condition: &str) -> GraphEdge {
    GraphEdge {
        source: source.to_string(),
        target: target.to_string(),
        data: json!({ "condition": condition }),
    }
}

/// trigger → set → set: fully automatic, runs to completion on `start`.
#[allow(dead_code)]
pub fn automatic_graph() -> WorkflowGraph {
    WorkflowGraph {
        nodes: vec![
            node("n1", "manualTrigger", "Kickoff"),
            node("n2", "set", "Prepare Data"),
            node("n3", "set", "Finalize"),
        ],
        edges: vec![edge("n1", "n2"), edge("n2", "n3")],
    }
}

/// trigger → transform → email: the external sink needs a confirmation,
/// so `start` stops in `running` with `awaiting_user_input` set.
#[allow(dead_code)]
pub fn approval_graph() -> WorkflowGraph {
    WorkflowGraph {
        nodes: vec![
            node("n1", "manualTrigger", "Kickoff"),
            node("n2", "set", "Prepare Data"),
            node("n3", "emailSend", "Send Email"),
        ],
        edges: vec![edge("n1", "n2"), edge("n2", "n3")],
    }
}

/// trigger → form → set: the form gate parks the walk in
/// `waiting-for-input` until `modify-input` supplies a value.
#[allow(dead_code)]
pub fn input_graph() -> WorkflowGraph {
    WorkflowGraph {
        nodes: vec![
            node("n1", "manualTrigger", "Kickoff"),
            node("n2", "formInput", "Customer Email"),
            node("n3", "set", "Finalize"),
        ],
        edges: vec![edge("n1", "n2"), edge("n2", "n3")],
    }
}

/// In-memory graph store keyed by workflow id; tenant is ignored.
pub struct MemoryGraphStore {
    graphs: Mutex<Vec<(String, WorkflowGraph)>>,
    pub loads: AtomicUsize,
}

impl MemoryGraphStore {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self {
            graphs: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn with_graph(workflow_id: &str, graph: WorkflowGraph) -> Self {
        let store = Self::new();
        store
            .graphs
            .lock()
            .push((workflow_id.to_string(), graph));
        store
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn load_graph(
        &self,
        workflow_id: &str,
        _tenant: &str,
    ) -> Result<Option<WorkflowGraph>, GraphStoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .graphs
            .lock()
            .iter()
            .find(|(id, _)| id == workflow_id)
            .map(|(_, graph)| graph.clone()))
    }
}

/// Agent runtime that can be told to fail the first N calls (retryably).
pub struct MemoryAgentRuntime {
    pub calls: AtomicUsize,
    fail_first: AtomicUsize,
}

impl MemoryAgentRuntime {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn failing_first(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl AgentRuntime for MemoryAgentRuntime {
    async fn create_journey(
        &self,
        _states: &[NodeStateMapping],
        _transitions: &[EdgeTransitionMapping],
        _metadata: Value,
    ) -> Result<String, AgentRuntimeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentRuntimeError::new("runtime temporarily unavailable", true));
        }
        Ok(format!("journey-{call}"))
    }
}

/// Subscriber that appends every delivered event to a shared buffer.
#[allow(dead_code)]
pub fn collecting_subscriber() -> (UpdateSubscriber, Arc<Mutex<Vec<WorkflowUpdateEvent>>>) {
    let received: Arc<Mutex<Vec<WorkflowUpdateEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let subscriber: UpdateSubscriber = Arc::new(move |event| {
        sink.lock().push(event);
        Ok(())
    });
    (subscriber, received)
}

/// Orchestrator over the given workflow graph with a default hub.
#[allow(dead_code)]
pub fn orchestrator_for(
    workflow_id: &str,
    graph: WorkflowGraph,
) -> (Arc<SessionOrchestrator>, Arc<StateSyncHub>) {
    orchestrator_with_hub(workflow_id, graph, StateSyncHub::new(SyncConfig::default()))
}

/// Orchestrator over the given workflow graph with a caller-supplied hub
/// (custom staleness windows, history limits).
#[allow(dead_code)]
pub fn orchestrator_with_hub(
    workflow_id: &str,
    graph: WorkflowGraph,
    hub: StateSyncHub,
) -> (Arc<SessionOrchestrator>, Arc<StateSyncHub>) {
    let mapper = Arc::new(GraphToJourneyMapper::new(
        Arc::new(MemoryGraphStore::with_graph(workflow_id, graph)),
        Arc::new(MemoryAgentRuntime::new()),
    ));
    let hub = Arc::new(hub);
    let orchestrator = Arc::new(SessionOrchestrator::new(
        mapper,
        IntentRouter::default(),
        Arc::clone(&hub),
        OrchestratorConfig::default(),
    ));
    (orchestrator, hub)
}
