mod common;

use std::time::Duration;

use common::{
    approval_graph, automatic_graph, collecting_subscriber, input_graph, orchestrator_for,
    orchestrator_with_hub,
};
use convoflow::session::{CreateSessionRequest, OrchestratorError};
use convoflow::sync::{StatePatch, StateSyncHub, SyncConfig, SyncError};
use convoflow::types::{ExecutionStatus, NodeOutcome};

#[tokio::test]
async fn create_session_returns_a_fresh_snapshot_and_vocabulary() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    assert_eq!(session.initial_state.execution_status, ExecutionStatus::NotStarted);
    assert_eq!(session.initial_state.total_nodes, 3);
    assert!(session.initial_state.awaiting_user_input);
    assert!(session.welcome_message.contains("start the workflow"));
    assert!(session.available_commands.contains(&"start-workflow"));
    assert_eq!(session.journey_id, "journey-1");
}

#[tokio::test]
async fn create_session_rejects_blank_fields_before_any_mutation() {
    let (orchestrator, hub) = orchestrator_for("wf", approval_graph());
    let err = orchestrator
        .create_session(CreateSessionRequest::new("wf", "  ", "dana"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation { .. }));
    assert!(!err.is_retryable());
    assert_eq!(hub.session_count(), 0);
}

#[tokio::test]
async fn start_runs_until_the_confirmation_gate() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    let result = orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    assert!(result.command_processed);
    assert_eq!(result.workflow_action.as_deref(), Some("workflow-started"));
    let state = &result.updated_state;
    assert_eq!(state.execution_status, ExecutionStatus::Running);
    assert_eq!(state.completed_count(), 2, "both automatic steps resolved");
    assert_eq!(state.current_node_id.as_deref(), Some("n3"));
    assert!(state.awaiting_user_input, "external step needs a go-ahead");
}

#[tokio::test]
async fn starting_twice_is_a_noop_success() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    let first = orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();
    let second = orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    // Contextual damping (×0.3 while running) drops the repeat below the
    // mapping floor, so it degrades to a status report: success, no change.
    assert_eq!(
        second.updated_state.execution_status,
        ExecutionStatus::Running
    );
    assert_eq!(
        second.updated_state.updated_at, first.updated_state.updated_at,
        "no-op start must not touch the snapshot"
    );
}

#[tokio::test]
async fn starting_a_finished_run_is_a_noop_with_a_clear_reply() {
    let (orchestrator, _hub) = orchestrator_for("wf", automatic_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    // Terminal-state damping (×0.4) still clears the floor, so the start
    // handler itself runs and no-ops.
    let again = orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();
    assert!(again.command_processed);
    assert_eq!(
        again.updated_state.execution_status,
        ExecutionStatus::Completed
    );
    assert!(again.agent_response.contains("already finished"));
}

#[tokio::test]
async fn resume_confirms_the_gated_step_and_completes_the_run() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    let result = orchestrator
        .process_command(&session.session_id, "wf", "resume", "dana")
        .await
        .unwrap();

    let state = &result.updated_state;
    assert_eq!(state.execution_status, ExecutionStatus::Completed);
    assert_eq!(state.completed_count(), state.total_nodes);
    assert!(!state.awaiting_user_input);
    assert!(state.current_node_id.is_none());
}

#[tokio::test]
async fn fully_automatic_graphs_complete_on_start() {
    let (orchestrator, _hub) = orchestrator_for("wf", automatic_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    let result = orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();
    assert_eq!(
        result.updated_state.execution_status,
        ExecutionStatus::Completed
    );
    assert_eq!(result.updated_state.completed_count(), 3);
}

#[tokio::test]
async fn pause_and_damped_pause_keep_the_session_paused() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    let paused = orchestrator
        .process_command(&session.session_id, "wf", "pause the workflow", "dana")
        .await
        .unwrap();
    assert_eq!(
        paused.updated_state.execution_status,
        ExecutionStatus::Paused
    );

    // Contextual damping drops a repeated pause below the mapping floor; it
    // degrades to a status report and nothing flips.
    let again = orchestrator
        .process_command(&session.session_id, "wf", "pause the workflow", "dana")
        .await
        .unwrap();
    assert!(!again.command_processed);
    assert_eq!(
        again.updated_state.execution_status,
        ExecutionStatus::Paused
    );
    assert_eq!(again.updated_state.updated_at, paused.updated_state.updated_at);
}

#[tokio::test]
async fn repeated_get_status_never_mutates() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    let first = orchestrator
        .process_command(&session.session_id, "wf", "what is the status", "dana")
        .await
        .unwrap();
    let second = orchestrator
        .process_command(&session.session_id, "wf", "what is the status", "dana")
        .await
        .unwrap();
    assert_eq!(first.updated_state, second.updated_state);
    assert!(second.agent_response.contains("not-started"));
}

#[tokio::test]
async fn input_gate_is_satisfied_by_modify_input() {
    let (orchestrator, _hub) = orchestrator_for("wf", input_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    let started = orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();
    assert_eq!(
        started.updated_state.execution_status,
        ExecutionStatus::WaitingForInput
    );
    assert_eq!(started.updated_state.current_node_id.as_deref(), Some("n2"));

    // Resume cannot satisfy an input gate.
    let nudged = orchestrator
        .process_command(&session.session_id, "wf", "resume", "dana")
        .await
        .unwrap();
    assert_eq!(
        nudged.updated_state.execution_status,
        ExecutionStatus::WaitingForInput
    );

    let supplied = orchestrator
        .process_command(&session.session_id, "wf", "set the value to 42", "dana")
        .await
        .unwrap();
    let state = &supplied.updated_state;
    assert_eq!(state.execution_status, ExecutionStatus::Completed);
    assert_eq!(
        state.contexts.get("customer_email"),
        Some(&serde_json::json!(42)),
        "positional value adopts the input state's context key"
    );
}

#[tokio::test]
async fn skip_leaves_completion_unreachable_until_retry_or_cancel() {
    let (orchestrator, _hub) = orchestrator_for("wf", input_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    let skipped = orchestrator
        .process_command(&session.session_id, "wf", "skip this step", "dana")
        .await
        .unwrap();
    let state = &skipped.updated_state;
    assert_eq!(state.skipped_nodes(), vec!["n2"]);
    // The rest of the flow ran, but a skipped node blocks `completed`.
    assert_ne!(state.execution_status, ExecutionStatus::Completed);
    assert!(state.awaiting_user_input);

    let cancelled = orchestrator
        .process_command(&session.session_id, "wf", "cancel the workflow", "dana")
        .await
        .unwrap();
    assert_eq!(
        cancelled.updated_state.execution_status,
        ExecutionStatus::Cancelled
    );
}

#[tokio::test]
async fn retry_recovers_an_injected_step_failure() {
    let (orchestrator, hub) = orchestrator_for("wf", automatic_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    // Simulate the external engine reporting a failure mid-run.
    hub.update_session(
        &session.session_id,
        &StatePatch::new()
            .with_status(ExecutionStatus::Running)
            .with_awaiting_input(false)
            .with_outcome("n1", NodeOutcome::Completed)
            .with_outcome("n2", NodeOutcome::Failed)
            .with_recorded_error("prepare step failed"),
    )
    .unwrap();

    let result = orchestrator
        .process_command(&session.session_id, "wf", "retry the step", "dana")
        .await
        .unwrap();
    let state = &result.updated_state;
    assert_eq!(result.workflow_action.as_deref(), Some("step-retried"));
    assert!(state.failed_nodes().is_empty());
    assert_eq!(state.execution_status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn unknown_step_reference_is_a_command_error_folded_into_the_session() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .ok();

    let err = orchestrator
        .process_command(
            &session.session_id,
            "wf",
            "skip the step \"does not exist\"",
            "dana",
        )
        .await
        .unwrap_err();
    let OrchestratorError::Command {
        technical,
        user_message,
    } = &err
    else {
        panic!("expected a command processing error, got {err:?}");
    };
    assert!(technical.contains("does not exist"));
    assert!(user_message.starts_with("Sorry"));
    assert!(err.is_retryable());

    let state = orchestrator.get_state(&session.session_id).unwrap();
    assert_eq!(state.error_count, 1);
    assert!(state.last_error.as_deref().unwrap().contains("does not exist"));
}

#[tokio::test]
async fn commands_against_unknown_sessions_fail_cleanly() {
    let (orchestrator, _hub) = orchestrator_for("wf", automatic_graph());
    let err = orchestrator
        .process_command("no-such-session", "wf", "status", "dana")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Sync(SyncError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn workflow_mismatch_is_rejected() {
    let (orchestrator, _hub) = orchestrator_for("wf", automatic_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    let err = orchestrator
        .process_command(&session.session_id, "other-wf", "status", "dana")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation { .. }));
}

#[tokio::test]
async fn subscribers_see_one_event_per_state_changing_command() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();
    let (subscriber, received) = collecting_subscriber();
    let subscription = orchestrator
        .subscribe(&session.session_id, subscriber)
        .unwrap();

    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();
    assert_eq!(received.lock().len(), 1);

    // A read-only command commits nothing.
    orchestrator
        .process_command(&session.session_id, "wf", "show progress", "dana")
        .await
        .unwrap();
    assert_eq!(received.lock().len(), 1);

    subscription.unsubscribe();
    orchestrator
        .process_command(&session.session_id, "wf", "pause the workflow", "dana")
        .await
        .unwrap();
    assert_eq!(received.lock().len(), 1, "no delivery after unsubscribe");
}

#[tokio::test]
async fn terminate_session_is_best_effort_and_idempotent() {
    let (orchestrator, _hub) = orchestrator_for("wf", automatic_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    assert!(orchestrator.terminate_session(&session.session_id));
    assert!(orchestrator.get_state(&session.session_id).is_none());
    assert!(!orchestrator.terminate_session(&session.session_id));
}

#[tokio::test]
async fn idle_sessions_vanish_after_the_sweep() {
    let hub = StateSyncHub::new(SyncConfig {
        stale_after: Duration::from_millis(30),
        ..SyncConfig::default()
    });
    let (orchestrator, _hub) = orchestrator_with_hub("wf", automatic_graph(), hub);
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let swept = orchestrator.sweep_idle_sessions();
    assert_eq!(swept, vec![session.session_id.clone()]);
    assert!(orchestrator.get_state(&session.session_id).is_none());
}

#[tokio::test]
async fn initial_input_is_processed_during_creation() {
    let (orchestrator, _hub) = orchestrator_for("wf", automatic_graph());
    let session = orchestrator
        .create_session(
            CreateSessionRequest::new("wf", "acme", "dana")
                .with_initial_input("start the workflow"),
        )
        .await
        .unwrap();
    assert_eq!(
        session.initial_state.execution_status,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn disabling_graceful_degradation_asks_for_clarification() {
    use convoflow::session::ConversationalConfig;

    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(
            CreateSessionRequest::new("wf", "acme", "dana").with_conversational(
                ConversationalConfig {
                    graceful_degradation: false,
                    ..ConversationalConfig::default()
                },
            ),
        )
        .await
        .unwrap();
    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();

    // "start" while running falls below the mapping floor; with degradation
    // off the agent asks for clarification instead of reporting status.
    let result = orchestrator
        .process_command(&session.session_id, "wf", "start", "dana")
        .await
        .unwrap();
    assert!(!result.command_processed);
    assert!(result.agent_response.contains("list-options"));
    assert_eq!(
        result.updated_state.execution_status,
        ExecutionStatus::Running
    );
}

#[tokio::test]
async fn suggestions_track_the_session_phase() {
    let (orchestrator, _hub) = orchestrator_for("wf", approval_graph());
    let session = orchestrator
        .create_session(CreateSessionRequest::new("wf", "acme", "dana"))
        .await
        .unwrap();

    let fresh = orchestrator
        .process_command(&session.session_id, "wf", "what is the status", "dana")
        .await
        .unwrap();
    assert!(fresh
        .suggested_actions
        .contains(&"start-workflow".to_string()));

    orchestrator
        .process_command(&session.session_id, "wf", "start the workflow", "dana")
        .await
        .unwrap();
    let running = orchestrator
        .process_command(&session.session_id, "wf", "what is the status", "dana")
        .await
        .unwrap();
    assert!(running
        .suggested_actions
        .contains(&"pause-workflow".to_string()));
}
