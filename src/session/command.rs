//! The closed command vocabulary and handler outcome types.
//!
//! Commands are a tagged union rather than strings so the orchestrator's
//! dispatch is exhaustively checked at compile time; adding a variant
//! without a handler is a build error, not a runtime fallthrough.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::entities::{EntityKind, ExtractedEntity};
use crate::intent::matcher::CommandCategory;
use crate::sync::state::StatePatch;

/// A fully parameterized workflow command, ready to dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum WorkflowCommand {
    StartWorkflow,
    PauseWorkflow,
    ResumeWorkflow,
    CancelWorkflow,
    RetryStep { node_ref: Option<String> },
    SkipStep { node_ref: Option<String> },
    ModifyInput { values: FxHashMap<String, Value> },
    GetStatus,
    ExplainStep { node_ref: Option<String> },
    ShowProgress,
    ListOptions,
}

impl WorkflowCommand {
    /// Stable kebab-case command name (matches [`CommandCategory::as_str`]).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartWorkflow => "start-workflow",
            Self::PauseWorkflow => "pause-workflow",
            Self::ResumeWorkflow => "resume-workflow",
            Self::CancelWorkflow => "cancel-workflow",
            Self::RetryStep { .. } => "retry-step",
            Self::SkipStep { .. } => "skip-step",
            Self::ModifyInput { .. } => "modify-input",
            Self::GetStatus => "get-status",
            Self::ExplainStep { .. } => "explain-step",
            Self::ShowProgress => "show-progress",
            Self::ListOptions => "list-options",
        }
    }

    /// The full spoken vocabulary, for welcome messages and `list-options`.
    #[must_use]
    pub fn vocabulary() -> Vec<&'static str> {
        CommandCategory::ALL.iter().map(|c| c.as_str()).collect()
    }

    /// Build a command from a classified category plus extracted entities.
    #[must_use]
    pub fn from_category(category: CommandCategory, entities: &[ExtractedEntity]) -> Self {
        let node_ref = first_reference(entities);
        match category {
            CommandCategory::StartWorkflow => Self::StartWorkflow,
            CommandCategory::PauseWorkflow => Self::PauseWorkflow,
            CommandCategory::ResumeWorkflow => Self::ResumeWorkflow,
            CommandCategory::CancelWorkflow => Self::CancelWorkflow,
            CommandCategory::RetryStep => Self::RetryStep { node_ref },
            CommandCategory::SkipStep => Self::SkipStep { node_ref },
            CommandCategory::ModifyInput => Self::ModifyInput {
                values: input_values(entities),
            },
            CommandCategory::GetStatus => Self::GetStatus,
            CommandCategory::ExplainStep => Self::ExplainStep { node_ref },
            CommandCategory::ShowProgress => Self::ShowProgress,
            CommandCategory::ListOptions => Self::ListOptions,
        }
    }

    /// Read-only commands never produce a state patch.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::GetStatus | Self::ExplainStep { .. } | Self::ShowProgress | Self::ListOptions
        )
    }
}

fn first_reference(entities: &[ExtractedEntity]) -> Option<String> {
    entities
        .iter()
        .find(|e| e.kind == EntityKind::Reference)
        .and_then(|e| e.value.as_str().map(str::to_string))
}

/// Pair references with literals for `modify-input`: a reference names the
/// value it precedes; unnamed literals land under positional keys.
fn input_values(entities: &[ExtractedEntity]) -> FxHashMap<String, Value> {
    let mut values = FxHashMap::default();
    let mut pending_key: Option<String> = None;
    let mut unnamed = 0usize;
    for entity in entities {
        match entity.kind {
            EntityKind::Reference => {
                if let Some(name) = entity.value.as_str() {
                    pending_key = Some(name.to_string());
                }
            }
            EntityKind::Number | EntityKind::Boolean => {
                let key = pending_key
                    .take()
                    .unwrap_or_else(|| format!("value_{unnamed}"));
                if key.starts_with("value_") {
                    unnamed += 1;
                }
                values.insert(key, entity.value.clone());
            }
        }
    }
    // A trailing reference with no literal is still a value: the user named
    // the thing they want to use.
    if let Some(name) = pending_key
        && values.is_empty()
    {
        values.insert("value_0".to_string(), Value::String(name));
    }
    values
}

/// Result of one command handler.
///
/// `patch: None` means the command was a no-op or read-only; the orchestrator
/// then skips the hub entirely and the session snapshot is untouched.
#[derive(Clone, Debug, Default)]
pub struct CommandOutcome {
    pub patch: Option<StatePatch>,
    /// Whether the transition deserves user-visible emphasis.
    pub significant: bool,
    /// Short machine-facing description of what happened, e.g.
    /// `"workflow-started"`; `None` for pure reads.
    pub workflow_action: Option<String>,
    /// Entry prompts and remarks gathered while advancing, woven into the
    /// reply.
    pub notes: Vec<String>,
}

impl CommandOutcome {
    /// A read-only or no-op outcome.
    #[must_use]
    pub fn unchanged() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_patch(mut self, patch: StatePatch) -> Self {
        self.patch = Some(patch);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.workflow_action = Some(action.into());
        self
    }

    #[must_use]
    pub fn significant(mut self) -> Self {
        self.significant = true;
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            kind: EntityKind::Reference,
            value: json!(name),
            raw: name.to_string(),
            span: (0, name.len()),
            confidence: 0.8,
        }
    }

    fn number(n: i64, start: usize) -> ExtractedEntity {
        ExtractedEntity {
            kind: EntityKind::Number,
            value: json!(n),
            raw: n.to_string(),
            span: (start, start + 2),
            confidence: 0.7,
        }
    }

    #[test]
    fn command_names_match_categories() {
        for category in CommandCategory::ALL {
            let command = WorkflowCommand::from_category(category, &[]);
            assert_eq!(command.name(), category.as_str());
        }
    }

    #[test]
    fn retry_picks_up_node_reference() {
        let command = WorkflowCommand::from_category(CommandCategory::RetryStep, &[reference("validate")]);
        assert_eq!(
            command,
            WorkflowCommand::RetryStep {
                node_ref: Some("validate".into())
            }
        );
    }

    #[test]
    fn modify_input_pairs_names_with_literals() {
        let entities = vec![reference("timeout"), number(500, 10)];
        let command = WorkflowCommand::from_category(CommandCategory::ModifyInput, &entities);
        let WorkflowCommand::ModifyInput { values } = command else {
            panic!("expected modify-input");
        };
        assert_eq!(values.get("timeout"), Some(&json!(500)));
    }

    #[test]
    fn vocabulary_is_complete() {
        let vocab = WorkflowCommand::vocabulary();
        assert_eq!(vocab.len(), 11);
        assert!(vocab.contains(&"start-workflow"));
        assert!(vocab.contains(&"list-options"));
    }
}
