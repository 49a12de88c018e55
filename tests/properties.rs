//! Property suites for the pure parts of the core: confidence capping,
//! transition classification, and snapshot invariants under arbitrary
//! update sequences.

use proptest::prelude::*;

use convoflow::intent::IntentRouter;
use convoflow::sync::{SessionState, StatePatch, StateSyncHub, SyncConfig, SyncError,
    classify_transition};
use convoflow::types::{ExecutionStatus, NodeOutcome};

fn any_status() -> impl Strategy<Value = ExecutionStatus> {
    prop_oneof![
        Just(ExecutionStatus::NotStarted),
        Just(ExecutionStatus::Running),
        Just(ExecutionStatus::Paused),
        Just(ExecutionStatus::WaitingForInput),
        Just(ExecutionStatus::Completed),
        Just(ExecutionStatus::Failed),
        Just(ExecutionStatus::Cancelled),
    ]
}

fn any_outcome() -> impl Strategy<Value = NodeOutcome> {
    prop_oneof![
        Just(NodeOutcome::Completed),
        Just(NodeOutcome::Failed),
        Just(NodeOutcome::Skipped),
    ]
}

fn snapshot(
    status: ExecutionStatus,
    outcomes: &[(u8, NodeOutcome)],
    awaiting: bool,
    current: Option<u8>,
) -> SessionState {
    let mut state = SessionState::new("wf", "journey", "prop", 16);
    state.execution_status = status;
    state.awaiting_user_input = awaiting;
    state.current_node_id = current.map(|n| format!("n{n}"));
    for (node, outcome) in outcomes {
        state.node_outcomes.insert(format!("n{node}"), *outcome);
    }
    state
}

proptest! {
    /// Adjusted confidence never exceeds 0.95, whatever the input or phase.
    #[test]
    fn confidence_is_always_capped(
        input in ".{0,60}",
        status in any_status(),
        error_count in 0u32..4,
    ) {
        let router = IntentRouter::default();
        let mut state = SessionState::new("wf", "journey", "prop", 4);
        state.execution_status = status;
        state.error_count = error_count;

        let routed = router.process_input("prop", &input, &state);
        prop_assert!(routed.confidence <= 0.95);
        for alternative in &routed.alternatives {
            prop_assert!(alternative.confidence <= 0.95);
        }
        for entity in &routed.entities {
            prop_assert!(entity.confidence <= 0.95);
        }
    }

    /// Classification is a pure function of the (prev, next) snapshot pair.
    #[test]
    fn classification_is_deterministic(
        prev_status in any_status(),
        next_status in any_status(),
        prev_outcomes in prop::collection::vec((0u8..16, any_outcome()), 0..8),
        next_outcomes in prop::collection::vec((0u8..16, any_outcome()), 0..8),
        prev_awaiting in any::<bool>(),
        next_awaiting in any::<bool>(),
        prev_current in prop::option::of(0u8..16),
        next_current in prop::option::of(0u8..16),
    ) {
        let prev = snapshot(prev_status, &prev_outcomes, prev_awaiting, prev_current);
        let next = snapshot(next_status, &next_outcomes, next_awaiting, next_current);
        let first = classify_transition(&prev, &next);
        let second = classify_transition(&prev, &next);
        prop_assert_eq!(first, second);
    }

    /// Whatever sequence of updates the hub accepts, the canonical snapshot
    /// keeps its invariants; everything else is rejected without persisting.
    #[test]
    fn accepted_updates_preserve_invariants(
        total in 1usize..6,
        ops in prop::collection::vec(
            (0u8..8, any_outcome(), any_status()),
            1..12,
        ),
    ) {
        let hub = StateSyncHub::new(SyncConfig::default());
        hub.register_session("prop", SessionState::new("wf", "journey", "prop", total))
            .unwrap();

        for (node, outcome, status) in ops {
            let patch = StatePatch::new()
                .with_outcome(format!("n{node}"), outcome)
                .with_status(status);
            match hub.update_session("prop", &patch) {
                Ok(committed) => {
                    prop_assert!(committed.state.completed_count() <= total);
                    prop_assert!(committed.state.validate().is_ok());
                }
                Err(SyncError::StateConsistency { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
            // The canonical snapshot is valid after every attempt, accepted
            // or rejected.
            let canonical = hub.get_state("prop").unwrap();
            prop_assert!(canonical.validate().is_ok());
        }
    }

    /// Completed counts are monotonically non-decreasing for accepted
    /// updates that only add outcomes.
    #[test]
    fn completion_is_monotonic_without_clears(
        total in 4usize..8,
        nodes in prop::collection::vec(0u8..8, 1..10),
    ) {
        let hub = StateSyncHub::new(SyncConfig::default());
        hub.register_session("prop", SessionState::new("wf", "journey", "prop", total))
            .unwrap();

        let mut last = 0usize;
        for node in nodes {
            let patch = StatePatch::new()
                .with_outcome(format!("n{node}"), NodeOutcome::Completed);
            if let Ok(committed) = hub.update_session("prop", &patch) {
                prop_assert!(committed.state.completed_count() >= last);
                last = committed.state.completed_count();
            }
        }
    }
}
