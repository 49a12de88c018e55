//! # Convoflow: Conversation-Driven Workflow Execution
//!
//! Convoflow lets a user drive a visually-authored workflow (a graph of
//! typed steps and connectors) through free-form natural-language
//! conversation. It translates the graph into a conversational state
//! machine, classifies utterances into a fixed command vocabulary, executes
//! commands against a live per-session snapshot, and broadcasts every
//! accepted change to subscribers in real time.
//!
//! ## Core Components
//!
//! - **[`mapping::GraphToJourneyMapper`]**: converts a workflow graph into a
//!   versioned journey (one conversational state per node, one transition
//!   per edge), cached per workflow id
//! - **[`intent::IntentRouter`]**: normalizes text, scores it against the
//!   command vocabulary with contextual re-weighting, and extracts entities
//! - **[`session::SessionOrchestrator`]**: owns session lifecycle, dispatches
//!   command handlers, and synthesizes replies
//! - **[`sync::StateSyncHub`]**: sole owner of canonical session state;
//!   validates, classifies, commits, and broadcasts every update
//!
//! External collaborators stay external: the graph store, the agent runtime
//! hosting journeys, and the optional durable conversation store are traits
//! implemented outside this crate. Step business logic, transport framing,
//! and authentication are out of scope by design.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use convoflow::graph::{GraphStore, GraphStoreError, WorkflowGraph};
//! use convoflow::intent::IntentRouter;
//! use convoflow::mapping::{
//!     AgentRuntime, AgentRuntimeError, EdgeTransitionMapping, GraphToJourneyMapper,
//!     NodeStateMapping,
//! };
//! use convoflow::session::{CreateSessionRequest, OrchestratorConfig, SessionOrchestrator};
//! use convoflow::sync::{StateSyncHub, SyncConfig};
//!
//! struct Graphs;
//!
//! #[async_trait]
//! impl GraphStore for Graphs {
//!     async fn load_graph(
//!         &self,
//!         _workflow_id: &str,
//!         _tenant: &str,
//!     ) -> Result<Option<WorkflowGraph>, GraphStoreError> {
//!         Ok(Some(WorkflowGraph::default()))
//!     }
//! }
//!
//! struct Runtime;
//!
//! #[async_trait]
//! impl AgentRuntime for Runtime {
//!     async fn create_journey(
//!         &self,
//!         _states: &[NodeStateMapping],
//!         _transitions: &[EdgeTransitionMapping],
//!         _metadata: serde_json::Value,
//!     ) -> Result<String, AgentRuntimeError> {
//!         Ok("journey-1".to_string())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mapper = Arc::new(GraphToJourneyMapper::new(Arc::new(Graphs), Arc::new(Runtime)));
//! let hub = Arc::new(StateSyncHub::new(SyncConfig::default()));
//! let orchestrator = Arc::new(SessionOrchestrator::new(
//!     mapper,
//!     IntentRouter::default(),
//!     Arc::clone(&hub),
//!     OrchestratorConfig::default(),
//! ));
//! orchestrator.start_sweeper();
//!
//! let session = orchestrator
//!     .create_session(CreateSessionRequest::new("wf-42", "acme", "dana"))
//!     .await?;
//! println!("{}", session.welcome_message);
//!
//! let result = orchestrator
//!     .process_command(&session.session_id, "wf-42", "start the workflow", "dana")
//!     .await?;
//! println!("{}", result.agent_response);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Independent sessions proceed in parallel; per-session mutation is atomic.
//! The hub holds one mutex per session slot across the whole
//! read-merge-validate-classify-commit-broadcast sequence, so writers to the
//! same session serialize and subscribers observe updates in commit order.
//! The intent router's conversation history is guarded independently.
//!
//! ## Module Guide
//!
//! - [`graph`] - Workflow graph input model and the graph-store seam
//! - [`mapping`] - Graph→journey translation and the mapping cache
//! - [`intent`] - Intent routing, entity extraction, conversation history
//! - [`session`] - Command vocabulary, configs, replies, orchestration
//! - [`sync`] - Canonical state, update classification, broadcast hub
//! - [`telemetry`] - Tracing subscriber setup
//! - [`types`] - Shared enums (statuses, outcomes, update kinds)

pub mod graph;
pub mod intent;
pub mod mapping;
pub mod session;
pub mod sync;
pub mod telemetry;
pub mod types;
