//! Session orchestration: lifecycle, command dispatch, reply synthesis, and
//! the idle-session sweep.
//!
//! The orchestrator composes the mapper, the intent router, and the state
//! sync hub. It owns the session→workflow index; the hub owns the canonical
//! snapshots. Every state mutation flows through
//! [`StateSyncHub::update_session`], and each processed command commits at
//! most one update, so subscribers see exactly one event per state-changing
//! command.

use std::sync::{Arc, Weak};
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::command::{CommandOutcome, WorkflowCommand};
use super::config::{ConversationalConfig, ExecutionConfig};
use super::responses;
use crate::intent::router::IntentRouter;
use crate::mapping::{GraphToJourneyMapper, JourneyMapping, MapperError, MappingOptions};
use crate::sync::hub::{StateSyncHub, Subscription, SyncError, UpdateSubscriber};
use crate::sync::state::{SessionState, StatePatch};
use crate::types::{ExecutionStatus, ExecutionTrigger, NodeOutcome};

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    /// Malformed or missing request fields; rejected before any mutation.
    #[error("invalid request: {message}")]
    #[diagnostic(code(convoflow::session::validation))]
    Validation { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mapping(#[from] MapperError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),

    /// A command handler failed. The technical message goes to logs and
    /// callers; the user message is a short apology fit for the chat.
    #[error("command processing failed: {technical}")]
    #[diagnostic(
        code(convoflow::session::command_processing),
        help("The failure was recorded on the session; the command may be retried.")
    )]
    Command { technical: String, user_message: String },
}

impl OrchestratorError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation { .. } => false,
            Self::Mapping(err) => err.is_retryable(),
            Self::Sync(err) => err.is_retryable(),
            Self::Command { .. } => true,
        }
    }

    /// Human-friendly text, when the error carries one.
    #[must_use]
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Command { user_message, .. } => Some(user_message),
            _ => None,
        }
    }
}

/// Handler-internal failure carrying both required messages.
#[derive(Debug)]
struct HandlerFailure {
    technical: String,
    user: String,
}

impl HandlerFailure {
    fn new(technical: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            technical: technical.into(),
            user: user.into(),
        }
    }
}

/// Request to open a new conversational session over a workflow.
#[derive(Clone, Debug)]
pub struct CreateSessionRequest {
    pub workflow_id: String,
    pub tenant: String,
    pub requester: String,
    pub conversational: Option<ConversationalConfig>,
    pub execution: Option<ExecutionConfig>,
    /// Optional first utterance, processed immediately after registration.
    pub initial_input: Option<String>,
}

impl CreateSessionRequest {
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        tenant: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            tenant: tenant.into(),
            requester: requester.into(),
            conversational: None,
            execution: None,
            initial_input: None,
        }
    }

    #[must_use]
    pub fn with_conversational(mut self, config: ConversationalConfig) -> Self {
        self.conversational = Some(config);
        self
    }

    #[must_use]
    pub fn with_execution(mut self, config: ExecutionConfig) -> Self {
        self.execution = Some(config);
        self
    }

    #[must_use]
    pub fn with_initial_input(mut self, input: impl Into<String>) -> Self {
        self.initial_input = Some(input.into());
        self
    }
}

/// Result of session creation.
#[derive(Clone, Debug)]
pub struct CreatedSession {
    pub session_id: String,
    pub journey_id: String,
    pub initial_state: SessionState,
    pub welcome_message: String,
    pub available_commands: Vec<&'static str>,
}

/// Result of one processed command.
#[derive(Clone, Debug)]
pub struct CommandResult {
    /// False when the input fell below the mapping floor and degraded to a
    /// status report.
    pub command_processed: bool,
    pub workflow_action: Option<String>,
    pub agent_response: String,
    pub updated_state: SessionState,
    pub suggested_actions: Vec<String>,
}

#[derive(Clone)]
struct SessionEntry {
    workflow_id: String,
    mapping: Arc<JourneyMapping>,
    conversational: ConversationalConfig,
    execution: ExecutionConfig,
}

/// Orchestrator tuning knobs.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Cadence of the idle-session sweep.
    pub sweep_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    /// Resolve configuration with environment overrides
    /// (`CONVOFLOW_SWEEP_INTERVAL_SECS`).
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(secs) = std::env::var("CONVOFLOW_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = secs.parse::<u64>()
        {
            config.sweep_interval = Duration::from_secs(secs);
        }
        config
    }
}

struct SweeperState {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Composes mapper, router, and hub into the transport-agnostic session API.
///
/// Construct with explicit collaborator instances; independent orchestrators
/// (tests, tenants) can coexist because nothing here is process-global.
pub struct SessionOrchestrator {
    mapper: Arc<GraphToJourneyMapper>,
    router: IntentRouter,
    hub: Arc<StateSyncHub>,
    sessions: RwLock<FxHashMap<String, SessionEntry>>,
    config: OrchestratorConfig,
    sweeper: Mutex<Option<SweeperState>>,
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(
        mapper: Arc<GraphToJourneyMapper>,
        router: IntentRouter,
        hub: Arc<StateSyncHub>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            mapper,
            router,
            hub,
            sessions: RwLock::new(FxHashMap::default()),
            config,
            sweeper: Mutex::new(None),
        }
    }

    /// The hub backing this orchestrator (for direct subscription APIs).
    #[must_use]
    pub fn hub(&self) -> &Arc<StateSyncHub> {
        &self.hub
    }

    /// Create a session: resolve the active mapping, register the initial
    /// snapshot with the hub, and greet the user with the command vocabulary.
    #[instrument(skip(self, request), fields(workflow_id = %request.workflow_id))]
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, OrchestratorError> {
        for (field, value) in [
            ("workflow_id", &request.workflow_id),
            ("tenant", &request.tenant),
            ("requester", &request.requester),
        ] {
            if value.trim().is_empty() {
                return Err(OrchestratorError::Validation {
                    message: format!("{field} must not be empty"),
                });
            }
        }

        let conversational = request.conversational.clone().unwrap_or_default();
        let execution = request.execution.clone().unwrap_or_default();
        let options = MappingOptions {
            conversational: conversational.clone(),
            execution: execution.clone(),
            force_refresh: false,
        };
        let mapping = self
            .mapper
            .active_mapping(
                &request.workflow_id,
                &request.tenant,
                &request.requester,
                &options,
            )
            .await?;

        let session_id = Uuid::new_v4().to_string();
        let initial = SessionState::new(
            &request.workflow_id,
            &mapping.journey_id,
            &session_id,
            mapping.node_count(),
        );
        self.hub.register_session(&session_id, initial.clone())?;
        self.sessions.write().insert(
            session_id.clone(),
            SessionEntry {
                workflow_id: request.workflow_id.clone(),
                mapping: Arc::clone(&mapping),
                conversational: conversational.clone(),
                execution,
            },
        );
        info!(session_id, journey_id = %mapping.journey_id, "session created");

        let mut welcome_message = responses::welcome(&mapping, &conversational);
        if let Some(input) = &request.initial_input {
            match self
                .process_command(&session_id, &request.workflow_id, input, &request.requester)
                .await
            {
                Ok(result) => {
                    welcome_message.push(' ');
                    welcome_message.push_str(&result.agent_response);
                }
                Err(err) => warn!(session_id, error = %err, "initial input failed"),
            }
        }

        let initial_state = self.hub.get_state(&session_id).unwrap_or(initial);
        Ok(CreatedSession {
            session_id,
            journey_id: mapping.journey_id.clone(),
            initial_state,
            welcome_message,
            available_commands: WorkflowCommand::vocabulary(),
        })
    }

    /// Route one utterance, dispatch its command, merge the result through
    /// the hub, and synthesize a reply.
    #[instrument(skip(self, text), fields(session_id = %session_id, requester = %requester))]
    pub async fn process_command(
        &self,
        session_id: &str,
        workflow_id: &str,
        text: &str,
        requester: &str,
    ) -> Result<CommandResult, OrchestratorError> {
        let entry = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        if entry.workflow_id != workflow_id {
            return Err(OrchestratorError::Validation {
                message: format!(
                    "session {session_id} belongs to workflow {}, not {workflow_id}",
                    entry.workflow_id
                ),
            });
        }

        self.hub.touch(session_id);
        let state = self
            .hub
            .get_state(session_id)
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        let routed = self.router.process_input(session_id, text, &state);
        if routed.mapped_command.is_none() && !entry.conversational.graceful_degradation {
            // Degradation disabled: ask for clarification instead of
            // answering with a status report.
            let agent_response = responses::clarification(&entry.conversational);
            self.router.record_agent_turn(session_id, &agent_response);
            return Ok(CommandResult {
                command_processed: false,
                workflow_action: None,
                agent_response,
                updated_state: state.clone(),
                suggested_actions: responses::suggested_actions(&state, &entry.conversational),
            });
        }
        let command = routed
            .mapped_command
            .clone()
            .unwrap_or(WorkflowCommand::GetStatus);
        debug!(command = command.name(), confidence = routed.confidence, "dispatching");

        let outcome = match self.dispatch(&command, &state, &entry) {
            Ok(outcome) => outcome,
            Err(failure) => {
                // Fold the failure into the session, then rethrow with both
                // messages.
                if let Err(err) = self.hub.update_session(
                    session_id,
                    &StatePatch::new().with_recorded_error(&failure.technical),
                ) {
                    error!(session_id, error = %err, "failed to record handler error");
                }
                self.router.record_agent_turn(session_id, &failure.user);
                return Err(OrchestratorError::Command {
                    technical: failure.technical,
                    user_message: failure.user,
                });
            }
        };

        let updated_state = match &outcome.patch {
            Some(patch) if !patch.is_empty() => {
                // A consistency violation here is fatal: propagate and do not
                // report the command successful.
                self.hub.update_session(session_id, patch)?.state
            }
            _ => state,
        };

        let agent_response = responses::render(
            &command,
            &outcome,
            &updated_state,
            &entry.mapping,
            &entry.conversational,
            routed.confirmation_required,
        );
        self.router.record_agent_turn(session_id, &agent_response);

        Ok(CommandResult {
            command_processed: routed.mapped_command.is_some(),
            workflow_action: outcome.workflow_action.clone(),
            agent_response,
            updated_state: updated_state.clone(),
            suggested_actions: responses::suggested_actions(&updated_state, &entry.conversational),
        })
    }

    /// Current snapshot, or `None` for unknown/expired sessions.
    #[must_use]
    pub fn get_state(&self, session_id: &str) -> Option<SessionState> {
        self.hub.get_state(session_id)
    }

    /// Best-effort termination: unregister from the hub, drop the index
    /// entry and the conversation history. Terminating twice is fine.
    pub fn terminate_session(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id);
        self.router.forget_session(session_id);
        let removed = self.hub.unregister_session(session_id);
        if removed {
            info!(session_id, "session terminated");
        }
        removed
    }

    /// Subscribe to a session's committed updates.
    pub fn subscribe(
        &self,
        session_id: &str,
        subscriber: UpdateSubscriber,
    ) -> Result<Subscription, SyncError> {
        self.hub.subscribe_to_session(session_id, subscriber)
    }

    /// Remove sessions idle past the hub's staleness window.
    ///
    /// This is the single authoritative sweep; the hub only reports
    /// staleness.
    pub fn sweep_idle_sessions(&self) -> Vec<String> {
        let stale = self.hub.stale_sessions(self.hub.stale_after());
        for session_id in &stale {
            warn!(session_id, "sweeping idle session");
            self.terminate_session(session_id);
        }
        stale
    }

    /// Spawn the background sweep task. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut guard = self.sweeper.lock();
        if guard.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; swallow it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(orchestrator) = weak.upgrade() else { break };
                        let swept = orchestrator.sweep_idle_sessions();
                        if !swept.is_empty() {
                            info!(count = swept.len(), "idle sessions swept");
                        }
                    }
                }
            }
        });
        *guard = Some(SweeperState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background sweep task, waiting for it to exit.
    pub async fn stop_sweeper(&self) {
        let state = self.sweeper.lock().take();
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }

    // ------------------------------------------------------------------
    // Command handlers
    // ------------------------------------------------------------------

    /// Exhaustive dispatch table. Read-only commands return
    /// [`CommandOutcome::unchanged`]; everything else builds a patch for the
    /// hub.
    fn dispatch(
        &self,
        command: &WorkflowCommand,
        state: &SessionState,
        entry: &SessionEntry,
    ) -> Result<CommandOutcome, HandlerFailure> {
        let mapping = &entry.mapping;
        let execution = &entry.execution;
        match command {
            WorkflowCommand::StartWorkflow => handle_start(state, mapping, execution),
            WorkflowCommand::PauseWorkflow => Ok(handle_pause(state)),
            WorkflowCommand::ResumeWorkflow => handle_resume(state, mapping, execution),
            WorkflowCommand::CancelWorkflow => Ok(handle_cancel(state)),
            WorkflowCommand::RetryStep { node_ref } => {
                handle_retry(state, mapping, execution, node_ref.as_deref())
            }
            WorkflowCommand::SkipStep { node_ref } => {
                handle_skip(state, mapping, execution, node_ref.as_deref())
            }
            WorkflowCommand::ModifyInput { values } => {
                handle_modify_input(state, mapping, execution, values)
            }
            WorkflowCommand::GetStatus
            | WorkflowCommand::ExplainStep { .. }
            | WorkflowCommand::ShowProgress
            | WorkflowCommand::ListOptions => Ok(CommandOutcome::unchanged()),
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if let Some(state) = self.sweeper.lock().take() {
            state.handle.abort();
        }
    }
}

// ----------------------------------------------------------------------
// The conversational walk
// ----------------------------------------------------------------------

/// Where a walk resumes from.
enum WalkStart {
    /// Enter a node: gate-check it, then resolve and continue.
    Enter(String),
    /// The node already resolved; continue from its outgoing transition.
    AfterResolve(String),
}

/// Advance through automatic states until a gate, a confirmation edge, or
/// the end of the journey stops the walk.
///
/// Gates: `user-input` triggers always stop; `user-confirmation` triggers
/// and confirmation-flagged transitions stop unless auto-approval is on;
/// configured pause points stop automatic states.
fn walk(
    mapping: &JourneyMapping,
    execution: &ExecutionConfig,
    state: &SessionState,
    start: WalkStart,
    mut patch: StatePatch,
    notes: &mut Vec<String>,
) -> Result<StatePatch, HandlerFailure> {
    let mut resolved: FxHashMap<String, NodeOutcome> = state.node_outcomes.clone();
    for node_id in &patch.clear_outcomes {
        resolved.remove(node_id);
    }
    for (node_id, outcome) in &patch.node_outcomes {
        resolved.insert(node_id.clone(), *outcome);
    }

    let mut pending = start;
    let hop_limit = mapping.node_count() * 2 + 4;
    let mut hops = 0;
    loop {
        hops += 1;
        if hops > hop_limit {
            return Err(HandlerFailure::new(
                format!("advancement exceeded {hop_limit} hops; the mapping likely has a cycle"),
                "Sorry, I ran into trouble advancing the workflow.",
            ));
        }
        match pending {
            WalkStart::Enter(node_id) => {
                let node = mapping.state_for_node(&node_id).ok_or_else(|| {
                    HandlerFailure::new(
                        format!("mapping {} has no state for node {node_id}", mapping.journey_id),
                        "Sorry, I ran into trouble advancing the workflow.",
                    )
                })?;
                // Input gates park the session in `waiting-for-input`;
                // confirmation gates and pause points keep it `running` but
                // flag `awaiting_user_input`.
                if node.execution_trigger == ExecutionTrigger::UserInput {
                    notes.push(node.entry_prompt.clone());
                    patch = patch
                        .with_current_node(Some(node_id))
                        .with_status(ExecutionStatus::WaitingForInput)
                        .with_awaiting_input(true);
                    return Ok(patch);
                }
                let confirmation_gated = !execution.auto_approval
                    && (node.execution_trigger == ExecutionTrigger::UserConfirmation
                        || execution.is_pause_point(&node_id));
                if confirmation_gated {
                    notes.push(node.entry_prompt.clone());
                    patch = patch
                        .with_current_node(Some(node_id))
                        .with_status(ExecutionStatus::Running)
                        .with_awaiting_input(true);
                    return Ok(patch);
                }
                notes.push(format!("Completed \"{}\".", node.display_name));
                resolved.insert(node_id.clone(), NodeOutcome::Completed);
                patch = patch.with_outcome(node_id.clone(), NodeOutcome::Completed);
                pending = WalkStart::AfterResolve(node_id);
            }
            WalkStart::AfterResolve(node_id) => {
                let transitions = mapping.transitions_from(&node_id);
                let Some(transition) = transitions.first() else {
                    return Ok(finish_walk(mapping, &resolved, patch, notes));
                };
                if transition.requires_confirmation && !execution.auto_approval {
                    let display = mapping
                        .state_for_node(&transition.target)
                        .map_or(transition.target.clone(), |s| s.display_name.clone());
                    notes.push(format!(
                        "Next is \"{display}\", which needs your go-ahead. Say \"resume\" to proceed."
                    ));
                    patch = patch
                        .with_current_node(Some(transition.target.clone()))
                        .with_status(ExecutionStatus::Running)
                        .with_awaiting_input(true);
                    return Ok(patch);
                }
                pending = WalkStart::Enter(transition.target.clone());
            }
        }
    }
}

/// The walk exhausted its transitions: terminal bookkeeping.
///
/// `completed` is only set when every node resolved as completed; a walk
/// ending with skipped or failed nodes leaves the session active so the user
/// can retry or cancel (the completion invariant is never bent).
fn finish_walk(
    mapping: &JourneyMapping,
    resolved: &FxHashMap<String, NodeOutcome>,
    patch: StatePatch,
    notes: &mut Vec<String>,
) -> StatePatch {
    let completed = resolved
        .values()
        .filter(|o| **o == NodeOutcome::Completed)
        .count();
    if completed == mapping.node_count() {
        notes.push("That was the last step. The workflow is complete.".to_string());
        patch
            .with_status(ExecutionStatus::Completed)
            .with_current_node(None)
            .with_awaiting_input(false)
    } else {
        let remaining = mapping.node_count() - completed;
        notes.push(format!(
            "Reached the end of the flow with {remaining} unresolved step(s). \
             You can say \"retry-step\" or \"cancel\"."
        ));
        patch
            .with_status(ExecutionStatus::Running)
            .with_current_node(None)
            .with_awaiting_input(true)
    }
}

fn handle_start(
    state: &SessionState,
    mapping: &JourneyMapping,
    execution: &ExecutionConfig,
) -> Result<CommandOutcome, HandlerFailure> {
    if !state.execution_status.can_start() {
        // Starting an already-started session is a no-op success.
        return Ok(CommandOutcome::unchanged());
    }
    let start = mapping.start_state().ok_or_else(|| {
        HandlerFailure::new(
            format!("mapping {} has no start state", mapping.journey_id),
            "Sorry, this workflow has no entry point I can start from.",
        )
    })?;
    let seed = StatePatch::new()
        .with_status(ExecutionStatus::Running)
        .with_awaiting_input(false)
        .with_current_node(Some(start.node_id.clone()));
    let mut notes = Vec::new();
    let patch = walk(
        mapping,
        execution,
        state,
        WalkStart::Enter(start.node_id.clone()),
        seed,
        &mut notes,
    )?;
    Ok(CommandOutcome::unchanged()
        .with_patch(patch)
        .with_action("workflow-started")
        .significant()
        .with_note(notes.join(" ")))
}

fn handle_pause(state: &SessionState) -> CommandOutcome {
    match state.execution_status {
        ExecutionStatus::Running | ExecutionStatus::WaitingForInput => CommandOutcome::unchanged()
            .with_patch(StatePatch::new().with_status(ExecutionStatus::Paused))
            .with_action("workflow-paused")
            .significant(),
        _ => CommandOutcome::unchanged(),
    }
}

fn handle_resume(
    state: &SessionState,
    mapping: &JourneyMapping,
    execution: &ExecutionConfig,
) -> Result<CommandOutcome, HandlerFailure> {
    match state.execution_status {
        ExecutionStatus::Paused => {
            let seed = StatePatch::new()
                .with_status(ExecutionStatus::Running)
                .with_awaiting_input(false);
            let mut notes = Vec::new();
            let patch = match &state.current_node_id {
                Some(current) if !state.node_outcomes.contains_key(current) => walk(
                    mapping,
                    execution,
                    state,
                    WalkStart::Enter(current.clone()),
                    seed,
                    &mut notes,
                )?,
                _ => seed,
            };
            Ok(CommandOutcome::unchanged()
                .with_patch(patch)
                .with_action("workflow-resumed")
                .significant()
                .with_note(notes.join(" ")))
        }
        ExecutionStatus::Running | ExecutionStatus::WaitingForInput
            if state.awaiting_user_input =>
        {
            let Some(current) = state.current_node_id.clone() else {
                return Ok(CommandOutcome::unchanged());
            };
            let node = mapping.state_for_node(&current).ok_or_else(|| {
                HandlerFailure::new(
                    format!("mapping {} has no state for node {current}", mapping.journey_id),
                    "Sorry, I lost track of the current step.",
                )
            })?;
            if node.execution_trigger == ExecutionTrigger::UserInput {
                // Resume cannot satisfy an input gate.
                return Ok(CommandOutcome::unchanged().with_note(node.entry_prompt.clone()));
            }
            // Confirmation granted: the gated node resolves and the walk
            // continues.
            let seed = StatePatch::new()
                .with_status(ExecutionStatus::Running)
                .with_awaiting_input(false)
                .with_outcome(current.clone(), NodeOutcome::Completed);
            let mut notes = vec![format!("Confirmed \"{}\".", node.display_name)];
            let patch = walk(
                mapping,
                execution,
                state,
                WalkStart::AfterResolve(current),
                seed,
                &mut notes,
            )?;
            Ok(CommandOutcome::unchanged()
                .with_patch(patch)
                .with_action("step-confirmed")
                .significant()
                .with_note(notes.join(" ")))
        }
        _ => Ok(CommandOutcome::unchanged()),
    }
}

fn handle_cancel(state: &SessionState) -> CommandOutcome {
    if state.execution_status.is_terminal() {
        return CommandOutcome::unchanged();
    }
    CommandOutcome::unchanged()
        .with_patch(
            StatePatch::new()
                .with_status(ExecutionStatus::Cancelled)
                .with_awaiting_input(false),
        )
        .with_action("workflow-cancelled")
        .significant()
}

/// Resolve a spoken step reference to a node id (exact id, then
/// case-insensitive display name).
fn resolve_node_ref(mapping: &JourneyMapping, node_ref: &str) -> Option<String> {
    if mapping.state_for_node(node_ref).is_some() {
        return Some(node_ref.to_string());
    }
    mapping
        .node_states
        .iter()
        .find(|s| s.display_name.eq_ignore_ascii_case(node_ref))
        .map(|s| s.node_id.clone())
}

fn handle_retry(
    state: &SessionState,
    mapping: &JourneyMapping,
    execution: &ExecutionConfig,
    node_ref: Option<&str>,
) -> Result<CommandOutcome, HandlerFailure> {
    if state.execution_status.is_terminal() || state.execution_status.can_start() {
        return Ok(CommandOutcome::unchanged());
    }
    let target = match node_ref {
        Some(reference) => resolve_node_ref(mapping, reference).ok_or_else(|| {
            HandlerFailure::new(
                format!("unknown step reference: {reference}"),
                format!("Sorry, I couldn't find a step called \"{reference}\"."),
            )
        })?,
        None => match state.failed_nodes().first() {
            Some(first_failed) => (*first_failed).to_string(),
            None => return Ok(CommandOutcome::unchanged()),
        },
    };
    if state.node_outcomes.get(&target) != Some(&NodeOutcome::Failed) {
        // Retrying a step that has not failed changes nothing.
        return Ok(CommandOutcome::unchanged());
    }
    let seed = StatePatch::new()
        .with_status(ExecutionStatus::Running)
        .with_awaiting_input(false)
        .with_cleared_outcome(target.clone());
    let mut notes = Vec::new();
    let patch = walk(
        mapping,
        execution,
        state,
        WalkStart::Enter(target),
        seed,
        &mut notes,
    )?;
    Ok(CommandOutcome::unchanged()
        .with_patch(patch)
        .with_action("step-retried")
        .significant()
        .with_note(notes.join(" ")))
}

fn handle_skip(
    state: &SessionState,
    mapping: &JourneyMapping,
    execution: &ExecutionConfig,
    node_ref: Option<&str>,
) -> Result<CommandOutcome, HandlerFailure> {
    if !state.execution_status.is_active() {
        return Ok(CommandOutcome::unchanged());
    }
    let target = match node_ref {
        Some(reference) => resolve_node_ref(mapping, reference).ok_or_else(|| {
            HandlerFailure::new(
                format!("unknown step reference: {reference}"),
                format!("Sorry, I couldn't find a step called \"{reference}\"."),
            )
        })?,
        None => match &state.current_node_id {
            Some(current) => current.clone(),
            None => return Ok(CommandOutcome::unchanged()),
        },
    };
    let display = mapping
        .state_for_node(&target)
        .map_or(target.clone(), |s| s.display_name.clone());
    let seed = StatePatch::new()
        .with_status(ExecutionStatus::Running)
        .with_awaiting_input(false)
        .with_outcome(target.clone(), NodeOutcome::Skipped);
    let mut notes = vec![format!("Skipped \"{display}\".")];
    let patch = walk(
        mapping,
        execution,
        state,
        WalkStart::AfterResolve(target),
        seed,
        &mut notes,
    )?;
    Ok(CommandOutcome::unchanged()
        .with_patch(patch)
        .with_action("step-skipped")
        .significant()
        .with_note(notes.join(" ")))
}

fn handle_modify_input(
    state: &SessionState,
    mapping: &JourneyMapping,
    execution: &ExecutionConfig,
    values: &FxHashMap<String, serde_json::Value>,
) -> Result<CommandOutcome, HandlerFailure> {
    if values.is_empty() {
        return Ok(CommandOutcome::unchanged());
    }
    let mut seed = StatePatch::new();
    for (key, value) in values {
        // Positional keys adopt the current input state's context name.
        let key = if key.starts_with("value_")
            && let Some(current) = &state.current_node_id
            && let Some(mapped_key) = mapping.context_key_for(current)
        {
            mapped_key.to_string()
        } else {
            key.clone()
        };
        seed = seed.with_context(key, value.clone());
    }

    let gated_input_node = match (&state.execution_status, &state.current_node_id) {
        (ExecutionStatus::WaitingForInput, Some(current)) => mapping
            .state_for_node(current)
            .filter(|node| node.execution_trigger == ExecutionTrigger::UserInput)
            .map(|_| current.clone()),
        _ => None,
    };
    let Some(current) = gated_input_node else {
        return Ok(CommandOutcome::unchanged()
            .with_patch(seed)
            .with_action("input-recorded"));
    };

    // The gate is satisfied: the input state resolves and the walk continues.
    let display = mapping
        .state_for_node(&current)
        .map_or(current.clone(), |s| s.display_name.clone());
    let seed = seed
        .with_status(ExecutionStatus::Running)
        .with_awaiting_input(false)
        .with_outcome(current.clone(), NodeOutcome::Completed);
    let mut notes = vec![format!("\"{display}\" has what it needs.")];
    let patch = walk(
        mapping,
        execution,
        state,
        WalkStart::AfterResolve(current),
        seed,
        &mut notes,
    )?;
    Ok(CommandOutcome::unchanged()
        .with_patch(patch)
        .with_action("input-recorded")
        .significant()
        .with_note(notes.join(" ")))
}
