//! Session orchestration: the command vocabulary, configuration surfaces,
//! reply templates, and the orchestrator composing mapper, router, and hub.

pub mod command;
pub mod config;
pub mod orchestrator;
pub mod responses;

pub use command::{CommandOutcome, WorkflowCommand};
pub use config::{
    BackoffStrategy, ConversationalConfig, ExecutionConfig, ExecutionMode, Personality,
    RetryPolicy, Verbosity,
};
pub use orchestrator::{
    CommandResult, CreateSessionRequest, CreatedSession, OrchestratorConfig, OrchestratorError,
    SessionOrchestrator,
};
