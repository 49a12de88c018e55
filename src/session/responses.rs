//! Reply synthesis: per-command response templates parameterized by
//! execution details and the session's conversational style.

use super::command::{CommandOutcome, WorkflowCommand};
use super::config::{ConversationalConfig, Personality, Verbosity};
use crate::mapping::JourneyMapping;
use crate::sync::state::SessionState;
use crate::types::ExecutionStatus;

/// Welcome message returned from session creation.
#[must_use]
pub fn welcome(mapping: &JourneyMapping, config: &ConversationalConfig) -> String {
    let greeting = match config.personality {
        Personality::Professional => "Session ready.",
        Personality::Friendly => "Hi! Your workflow is ready to go.",
        Personality::Concise => "Ready.",
    };
    let mut message = format!(
        "{greeting} \"{}\" has {} steps. Say \"start the workflow\" when you want to begin.",
        mapping.workflow_id,
        mapping.node_count()
    );
    if config.provide_suggestions {
        message.push_str(" You can also ask for \"list-options\" at any time.");
    }
    message
}

/// One-line status summary used across several templates.
#[must_use]
pub fn status_line(state: &SessionState) -> String {
    format!(
        "Status: {} ({} of {} steps complete).",
        state.execution_status,
        state.completed_count(),
        state.total_nodes
    )
}

/// Render the reply for a processed command.
#[must_use]
pub fn render(
    command: &WorkflowCommand,
    outcome: &CommandOutcome,
    state: &SessionState,
    mapping: &JourneyMapping,
    config: &ConversationalConfig,
    confirmation_hedge: bool,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if confirmation_hedge && config.ask_for_confirmation && !command.is_read_only() {
        parts.push("I think that's what you meant; tell me if not.".to_string());
    }

    parts.push(headline(command, outcome, state, mapping));
    if config.explain_steps {
        parts.extend(outcome.notes.iter().cloned());
    } else if let Some(last) = outcome.notes.last() {
        // Without step narration, keep only the final note: it carries the
        // gate prompt or terminal summary the user must see.
        parts.push(last.clone());
    }

    if config.show_progress && config.verbosity != Verbosity::Minimal && outcome.significant {
        parts.push(status_line(state));
    }
    if config.verbosity == Verbosity::Detailed
        && let Some(last_error) = &state.last_error
    {
        parts.push(format!("Last recorded error: {last_error}"));
    }

    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

fn headline(
    command: &WorkflowCommand,
    outcome: &CommandOutcome,
    state: &SessionState,
    mapping: &JourneyMapping,
) -> String {
    match command {
        WorkflowCommand::StartWorkflow => {
            if outcome.patch.is_some() {
                "Starting the workflow.".to_string()
            } else if state.execution_status.is_terminal() {
                format!(
                    "This run already finished ({}). Create a new session to run it again.",
                    state.execution_status
                )
            } else {
                format!("The workflow is already underway. {}", status_line(state))
            }
        }
        WorkflowCommand::PauseWorkflow => {
            if outcome.patch.is_some() {
                "Paused. Say \"resume\" whenever you're ready.".to_string()
            } else {
                format!("Nothing to pause right now. {}", status_line(state))
            }
        }
        WorkflowCommand::ResumeWorkflow => {
            if outcome.patch.is_some() {
                "Resuming.".to_string()
            } else if state.awaiting_user_input && state.execution_status.is_active() {
                "The current step needs input first; try \"modify-input\".".to_string()
            } else {
                format!("There's nothing paused to resume. {}", status_line(state))
            }
        }
        WorkflowCommand::CancelWorkflow => {
            if outcome.patch.is_some() {
                "Understood — the workflow run has been cancelled.".to_string()
            } else {
                "This run already finished; nothing to cancel.".to_string()
            }
        }
        WorkflowCommand::RetryStep { .. } => {
            if outcome.patch.is_some() {
                "Retrying that step.".to_string()
            } else {
                "I couldn't find a failed step to retry.".to_string()
            }
        }
        WorkflowCommand::SkipStep { .. } => {
            if outcome.patch.is_some() {
                "Skipping it and moving on.".to_string()
            } else {
                "There's no active step to skip.".to_string()
            }
        }
        WorkflowCommand::ModifyInput { values } => {
            if outcome.patch.is_some() {
                let names: Vec<&str> = values.keys().map(String::as_str).collect();
                if names.is_empty() {
                    "Input updated.".to_string()
                } else {
                    format!("Got it — recorded {}.", names.join(", "))
                }
            } else {
                "Tell me which value to set, e.g. \"set timeout to 500\".".to_string()
            }
        }
        WorkflowCommand::GetStatus => describe_status(state, mapping),
        WorkflowCommand::ExplainStep { node_ref } => explain_step(state, mapping, node_ref.as_deref()),
        WorkflowCommand::ShowProgress => {
            let percent = (state.progress() * 100.0).round() as u32;
            format!(
                "{percent}% complete: {} done, {} failed, {} skipped, {} remaining.",
                state.completed_count(),
                state.failed_nodes().len(),
                state.skipped_nodes().len(),
                state
                    .total_nodes
                    .saturating_sub(state.resolved_count())
            )
        }
        WorkflowCommand::ListOptions => {
            format!(
                "You can say: {}.",
                WorkflowCommand::vocabulary().join(", ")
            )
        }
    }
}

fn describe_status(state: &SessionState, mapping: &JourneyMapping) -> String {
    let mut line = status_line(state);
    if let Some(current) = &state.current_node_id
        && let Some(node_state) = mapping.state_for_node(current)
    {
        line.push_str(&format!(" Currently at \"{}\".", node_state.display_name));
    }
    if state.awaiting_user_input && state.execution_status.is_active() {
        line.push_str(" I'm waiting on you to continue.");
    }
    line
}

fn explain_step(
    state: &SessionState,
    mapping: &JourneyMapping,
    node_ref: Option<&str>,
) -> String {
    let target = node_ref
        .map(str::to_string)
        .or_else(|| state.current_node_id.clone());
    let Some(target) = target else {
        return "We're not on a step yet; start the workflow first.".to_string();
    };
    let found = mapping
        .state_for_node(&target)
        .or_else(|| {
            mapping
                .node_states
                .iter()
                .find(|s| s.display_name.eq_ignore_ascii_case(&target))
        });
    match found {
        Some(node_state) => format!(
            "\"{}\" is a {} step ({}). {}",
            node_state.display_name,
            node_state.category,
            node_state.execution_trigger,
            node_state.entry_prompt
        ),
        None => format!("I don't know a step called \"{target}\"."),
    }
}

/// Clarification reply for unmapped input when graceful degradation is off.
#[must_use]
pub fn clarification(config: &ConversationalConfig) -> String {
    let mut message =
        "I didn't catch a workflow command in that. Try \"list-options\" to see what you can say."
            .to_string();
    if config.fallback_to_visual {
        message.push_str(" You can also switch to the visual editor for this change.");
    }
    message
}

/// Context-sensitive suggested next commands.
#[must_use]
pub fn suggested_actions(state: &SessionState, config: &ConversationalConfig) -> Vec<String> {
    if !config.provide_suggestions {
        return Vec::new();
    }
    let suggestions: &[&str] = match state.execution_status {
        ExecutionStatus::NotStarted => &["start-workflow", "explain-step", "list-options"],
        ExecutionStatus::Running => &["get-status", "show-progress", "pause-workflow"],
        ExecutionStatus::Paused => &["resume-workflow", "get-status", "cancel-workflow"],
        ExecutionStatus::WaitingForInput => &["modify-input", "resume-workflow", "explain-step"],
        ExecutionStatus::Completed => &["show-progress", "list-options"],
        ExecutionStatus::Failed => &["retry-step", "skip-step", "show-progress"],
        ExecutionStatus::Cancelled => &["list-options"],
    };
    let mut actions: Vec<String> = suggestions.iter().map(ToString::to_string).collect();
    if state.execution_status == ExecutionStatus::Running && !state.failed_nodes().is_empty() {
        actions.insert(0, "retry-step".to_string());
    }
    actions
}
