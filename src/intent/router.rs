//! The natural-language intent router.
//!
//! `processInput` is deliberately infallible: whatever happens internally,
//! the caller gets a routed intent back. Unrecognizable input degrades to a
//! zero-confidence `get-status` so the conversation never dead-ends.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use super::entities::{ExtractedEntity, extract_entities};
use super::history::{ConversationHistory, ConversationStore, ConversationTurn, HISTORY_LIMIT};
use super::matcher::{CONFIDENCE_CAP, CommandCategory, IntentMatcher, default_matchers};
use crate::session::command::WorkflowCommand;
use crate::sync::state::SessionState;
use crate::types::ExecutionStatus;

/// Below this adjusted confidence the primary intent is not mapped to a
/// command and the orchestrator falls back to `get-status`.
pub const MAPPING_FLOOR: f64 = 0.3;
/// Below this the reply should ask the user to confirm before acting.
pub const CONFIRMATION_THRESHOLD: f64 = 0.8;
/// Below this the reply should spell out what was understood.
pub const VERBOSE_THRESHOLD: f64 = 0.5;

/// A category with its adjusted confidence.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredIntent {
    pub category: CommandCategory,
    pub confidence: f64,
}

/// Everything the router derives from one utterance.
#[derive(Clone, Debug)]
pub struct RoutedIntent {
    pub detected_intent: CommandCategory,
    /// Adjusted confidence of the primary intent, capped at 0.95.
    pub confidence: f64,
    /// The next three ranked categories.
    pub alternatives: Vec<ScoredIntent>,
    pub entities: Vec<ExtractedEntity>,
    /// Present only when confidence cleared the mapping floor.
    pub mapped_command: Option<WorkflowCommand>,
    /// Entity-derived parameters keyed by kind or reference name.
    pub parameters: FxHashMap<String, Value>,
    pub confirmation_required: bool,
    pub verbose_output: bool,
    /// Retained conversation window after appending this turn.
    pub history: Vec<ConversationTurn>,
}

impl RoutedIntent {
    fn degraded(history: Vec<ConversationTurn>) -> Self {
        Self {
            detected_intent: CommandCategory::GetStatus,
            confidence: 0.0,
            alternatives: Vec::new(),
            entities: Vec::new(),
            mapped_command: Some(WorkflowCommand::GetStatus),
            parameters: FxHashMap::default(),
            confirmation_required: true,
            verbose_output: true,
            history,
        }
    }
}

/// Stateless classification plus bounded per-session history.
pub struct IntentRouter {
    matchers: Vec<Box<dyn IntentMatcher>>,
    history: ConversationHistory,
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new(default_matchers(), None)
    }
}

impl IntentRouter {
    #[must_use]
    pub fn new(
        matchers: Vec<Box<dyn IntentMatcher>>,
        store: Option<Arc<dyn ConversationStore>>,
    ) -> Self {
        Self {
            matchers,
            history: ConversationHistory::new(HISTORY_LIMIT, store),
        }
    }

    /// Classify one utterance against the current session snapshot.
    pub fn process_input(
        &self,
        session_id: &str,
        text: &str,
        state: &SessionState,
    ) -> RoutedIntent {
        let normalized = normalize(text);
        if normalized.is_empty() {
            let turn = ConversationTurn::user(text, None, Vec::new());
            self.history.append(session_id, turn);
            return RoutedIntent::degraded(self.history.turns_for(session_id));
        }

        let mut scored: Vec<ScoredIntent> = self
            .matchers
            .iter()
            .filter_map(|matcher| {
                let hit = matcher.best_match(&normalized)?;
                let weight = contextual_weight(state, hit.category);
                Some(ScoredIntent {
                    category: hit.category,
                    confidence: (hit.confidence * weight).min(CONFIDENCE_CAP),
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let entities = extract_entities(&normalized);
        let Some(primary) = scored.first().cloned() else {
            let turn = ConversationTurn::user(text, None, entities);
            self.history.append(session_id, turn);
            debug!(session_id, input = %normalized, "no intent matched");
            return RoutedIntent::degraded(self.history.turns_for(session_id));
        };

        let mapped_command = if primary.confidence >= MAPPING_FLOOR {
            Some(WorkflowCommand::from_category(primary.category, &entities))
        } else {
            None
        };
        let parameters = derive_parameters(&entities);

        let turn = ConversationTurn::user(
            text,
            mapped_command.as_ref().map(|_| primary.category),
            entities.clone(),
        );
        self.history.append(session_id, turn);

        debug!(
            session_id,
            intent = %primary.category,
            confidence = primary.confidence,
            mapped = mapped_command.is_some(),
            "intent routed"
        );
        RoutedIntent {
            detected_intent: primary.category,
            confidence: primary.confidence,
            alternatives: scored.into_iter().skip(1).take(3).collect(),
            entities,
            mapped_command,
            parameters,
            confirmation_required: primary.confidence < CONFIRMATION_THRESHOLD,
            verbose_output: primary.confidence < VERBOSE_THRESHOLD,
            history: self.history.turns_for(session_id),
        }
    }

    /// Record the agent's side of the exchange.
    pub fn record_agent_turn(&self, session_id: &str, content: &str) {
        self.history
            .append(session_id, ConversationTurn::agent(content));
    }

    /// Retained conversation window for a session.
    #[must_use]
    pub fn history_for(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.history.turns_for(session_id)
    }

    /// Drop a session's history (termination, staleness sweep).
    pub fn forget_session(&self, session_id: &str) {
        self.history.clear(session_id);
    }
}

/// Normalize raw input: case-fold, expand contractions, collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    const CONTRACTIONS: [(&str, &str); 10] = [
        ("won't", "will not"),
        ("can't", "cannot"),
        ("n't", " not"),
        ("i'm", "i am"),
        ("it's", "it is"),
        ("that's", "that is"),
        ("what's", "what is"),
        ("let's", "let us"),
        ("'re", " are"),
        ("'ll", " will"),
    ];
    let mut lowered = text.to_lowercase();
    for (from, to) in CONTRACTIONS {
        if lowered.contains(from) {
            lowered = lowered.replace(from, to);
        }
    }
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fixed contextual re-weighting table keyed by (execution status, category).
///
/// Multipliers bias classification toward commands that make sense in the
/// session's current phase; the result is always re-capped at 0.95.
fn contextual_weight(state: &SessionState, category: CommandCategory) -> f64 {
    use CommandCategory as C;
    use ExecutionStatus as S;

    let mut weight = match (state.execution_status, category) {
        (S::NotStarted, C::StartWorkflow) => 1.2,
        (S::Running | S::Paused | S::WaitingForInput, C::StartWorkflow) => 0.3,
        (S::Paused, C::ResumeWorkflow) => 1.3,
        (S::Paused, C::PauseWorkflow) => 0.3,
        (S::Running, C::PauseWorkflow) => 1.1,
        (S::NotStarted, C::PauseWorkflow | C::ResumeWorkflow | C::SkipStep) => 0.5,
        (S::WaitingForInput, C::ModifyInput) => 1.3,
        (S::WaitingForInput, C::ResumeWorkflow) => 1.15,
        (S::Completed | S::Failed | S::Cancelled, C::StartWorkflow | C::CancelWorkflow) => 0.4,
        _ => 1.0,
    };
    if state.error_count > 0 {
        weight *= match category {
            C::RetryStep => 1.3,
            C::SkipStep => 1.15,
            _ => 1.0,
        };
    }
    weight
}

fn derive_parameters(entities: &[ExtractedEntity]) -> FxHashMap<String, Value> {
    use super::entities::EntityKind;
    let mut parameters = FxHashMap::default();
    for entity in entities {
        let key = match entity.kind {
            EntityKind::Reference => "reference",
            EntityKind::Number => "number",
            EntityKind::Boolean => "flag",
        };
        // First entity of each kind wins; later ones are still available in
        // the full entity list.
        parameters
            .entry(key.to_string())
            .or_insert_with(|| entity.value.clone());
    }
    parameters
}
