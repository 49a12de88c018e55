//! Intent matching strategies and the fixed command vocabulary.
//!
//! Matching is deliberately isolated behind [`IntentMatcher`] so the
//! pattern-based default can be swapped for a learned classifier without
//! touching the router or orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on any confidence score, raw or re-weighted.
pub const CONFIDENCE_CAP: f64 = 0.95;

/// The fixed command categories a user utterance can classify into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandCategory {
    StartWorkflow,
    PauseWorkflow,
    ResumeWorkflow,
    CancelWorkflow,
    RetryStep,
    SkipStep,
    ModifyInput,
    GetStatus,
    ExplainStep,
    ShowProgress,
    ListOptions,
}

impl CommandCategory {
    /// All categories, in evaluation order.
    pub const ALL: [Self; 11] = [
        Self::StartWorkflow,
        Self::PauseWorkflow,
        Self::ResumeWorkflow,
        Self::CancelWorkflow,
        Self::RetryStep,
        Self::SkipStep,
        Self::ModifyInput,
        Self::GetStatus,
        Self::ExplainStep,
        Self::ShowProgress,
        Self::ListOptions,
    ];

    /// Stable kebab-case command name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartWorkflow => "start-workflow",
            Self::PauseWorkflow => "pause-workflow",
            Self::ResumeWorkflow => "resume-workflow",
            Self::CancelWorkflow => "cancel-workflow",
            Self::RetryStep => "retry-step",
            Self::SkipStep => "skip-step",
            Self::ModifyInput => "modify-input",
            Self::GetStatus => "get-status",
            Self::ExplainStep => "explain-step",
            Self::ShowProgress => "show-progress",
            Self::ListOptions => "list-options",
        }
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One successful pattern hit.
#[derive(Clone, Debug, PartialEq)]
pub struct IntentMatch {
    pub category: CommandCategory,
    /// Raw (pre-reweighting) confidence, already capped.
    pub confidence: f64,
    /// The pattern text that matched.
    pub matched: String,
}

/// Strategy interface for classifying normalized input into one category.
///
/// Implementations score an utterance against a single category; the router
/// runs every matcher and ranks the results.
pub trait IntentMatcher: Send + Sync {
    fn category(&self) -> CommandCategory;

    /// Best match for `input`, which is already normalized (lowercase,
    /// contractions expanded, whitespace collapsed).
    fn best_match(&self, input: &str) -> Option<IntentMatch>;
}

/// Substring-pattern matcher: the default strategy.
///
/// Confidence is coverage-based: `min(0.95, 0.5 + coverage * 0.5)` where
/// coverage is the matched pattern's share of the input length. A pattern
/// that consumes the whole utterance scores the cap; a short keyword inside
/// a long sentence scores near the floor.
pub struct PatternMatcher {
    category: CommandCategory,
    patterns: Vec<&'static str>,
}

impl PatternMatcher {
    #[must_use]
    pub fn new(category: CommandCategory, patterns: Vec<&'static str>) -> Self {
        Self { category, patterns }
    }

    fn confidence_for(pattern: &str, input: &str) -> f64 {
        let coverage = pattern.len() as f64 / input.len() as f64;
        (0.5 + coverage * 0.5).min(CONFIDENCE_CAP)
    }
}

impl IntentMatcher for PatternMatcher {
    fn category(&self) -> CommandCategory {
        self.category
    }

    fn best_match(&self, input: &str) -> Option<IntentMatch> {
        if input.is_empty() {
            return None;
        }
        let mut best: Option<IntentMatch> = None;
        for pattern in &self.patterns {
            if !contains_phrase(input, pattern) {
                continue;
            }
            let confidence = Self::confidence_for(pattern, input);
            if best.as_ref().is_none_or(|b| confidence > b.confidence) {
                best = Some(IntentMatch {
                    category: self.category,
                    confidence,
                    matched: (*pattern).to_string(),
                });
            }
        }
        best
    }
}

/// Word-boundary-aware containment: "start" matches "please start it" but
/// not "restarting".
fn contains_phrase(input: &str, phrase: &str) -> bool {
    let mut search_from = 0;
    while let Some(pos) = input[search_from..].find(phrase) {
        let start = search_from + pos;
        let end = start + phrase.len();
        let left_ok = start == 0
            || !input[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let right_ok = end == input.len()
            || !input[end..].chars().next().is_some_and(char::is_alphanumeric);
        if left_ok && right_ok {
            return true;
        }
        search_from = start + 1;
        if search_from >= input.len() {
            break;
        }
    }
    false
}

/// The default matcher set covering the fixed vocabulary.
#[must_use]
pub fn default_matchers() -> Vec<Box<dyn IntentMatcher>> {
    use CommandCategory as C;
    vec![
        Box::new(PatternMatcher::new(
            C::StartWorkflow,
            vec![
                "start the workflow",
                "start workflow",
                "begin the workflow",
                "run the workflow",
                "kick off",
                "launch",
                "start",
                "begin",
                "go ahead",
                "execute",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::PauseWorkflow,
            vec![
                "pause the workflow",
                "pause workflow",
                "hold on",
                "wait a moment",
                "pause",
                "suspend",
                "hold",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::ResumeWorkflow,
            vec![
                "resume the workflow",
                "continue the workflow",
                "keep going",
                "carry on",
                "resume",
                "continue",
                "proceed",
                "confirm",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::CancelWorkflow,
            vec![
                "cancel the workflow",
                "stop the workflow",
                "cancel",
                "abort",
                "terminate",
                "give up",
                "stop",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::RetryStep,
            vec![
                "retry the step",
                "retry that step",
                "try again",
                "try that again",
                "run it again",
                "retry",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::SkipStep,
            vec![
                "skip this step",
                "skip the step",
                "skip that step",
                "move on",
                "skip",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::ModifyInput,
            vec![
                "change the input",
                "modify the input",
                "update the input",
                "set the value",
                "use the value",
                "change",
                "set",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::GetStatus,
            vec![
                "what is the status",
                "what is happening",
                "where are we",
                "how is it going",
                "status",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::ExplainStep,
            vec![
                "explain this step",
                "explain the step",
                "what does this step do",
                "what is this step",
                "tell me about this step",
                "explain",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::ShowProgress,
            vec![
                "show progress",
                "show me the progress",
                "how far along",
                "how much is left",
                "progress",
            ],
        )),
        Box::new(PatternMatcher::new(
            C::ListOptions,
            vec![
                "what can i do",
                "what are my options",
                "list options",
                "show options",
                "options",
                "help",
            ],
        )),
    ]
}
