//! Conversational and execution configuration surfaces.
//!
//! Both configs ride along on the journey mapping and on each session.
//! Defaults are production-sane; environment overrides follow the same
//! dotenvy resolution the rest of the crate uses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the agent talks to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Personality {
    Professional,
    Friendly,
    Concise,
}

/// How much detail replies carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verbosity {
    Minimal,
    Normal,
    Detailed,
}

/// Conversational style knobs for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationalConfig {
    pub personality: Personality,
    pub verbosity: Verbosity,
    pub show_progress: bool,
    pub explain_steps: bool,
    pub ask_for_confirmation: bool,
    pub provide_suggestions: bool,
    /// Fall back to a status report instead of erroring on low-confidence input.
    pub graceful_degradation: bool,
    /// Offer the visual editor when conversation cannot express an operation.
    pub fallback_to_visual: bool,
}

impl Default for ConversationalConfig {
    fn default() -> Self {
        Self {
            personality: Personality::Friendly,
            verbosity: Verbosity::Normal,
            show_progress: true,
            explain_steps: true,
            ask_for_confirmation: true,
            provide_suggestions: true,
            graceful_degradation: true,
            fallback_to_visual: false,
        }
    }
}

/// Pace at which the walk advances through mapped states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Pause at every state for an explicit go-ahead.
    StepByStep,
    /// Advance automatically wherever triggers allow.
    Autonomous,
    /// Autonomous, but honor the configured pause points.
    Hybrid,
}

/// Backoff schedule between retry attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy for outbound collaborator calls (mapping creation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_ms: u64,
    /// Machine codes eligible for retry; empty means "any retryable error".
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_ms: 250,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Base delay before attempt `attempt` (1-based; attempt 1 has no delay).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base = self.backoff_ms;
        let ms = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt - 1)),
            BackoffStrategy::Exponential => {
                base.saturating_mul(1u64.checked_shl(attempt - 2).unwrap_or(u64::MAX))
            }
        };
        Duration::from_millis(ms)
    }

    /// Whether an error with `code` may be retried under this policy.
    #[must_use]
    pub fn allows(&self, code: &str) -> bool {
        self.retryable_errors.is_empty() || self.retryable_errors.iter().any(|c| c == code)
    }
}

/// Execution-mode configuration for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Node ids where a hybrid walk always stops for confirmation.
    pub pause_points: Vec<String>,
    /// Auto-approve confirmation gates (confirmation states resolve
    /// immediately).
    pub auto_approval: bool,
    /// Bound for outbound collaborator calls, in milliseconds.
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Hybrid,
            pause_points: Vec::new(),
            auto_approval: false,
            timeout_ms: 10_000,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ExecutionConfig {
    /// Resolve configuration with environment overrides
    /// (`CONVOFLOW_MAPPING_TIMEOUT_MS`).
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(ms) = std::env::var("CONVOFLOW_MAPPING_TIMEOUT_MS")
            && let Ok(ms) = ms.parse::<u64>()
        {
            config.timeout_ms = ms;
        }
        config
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the walk should stop at `node_id` even when the trigger is
    /// automatic.
    #[must_use]
    pub fn is_pause_point(&self, node_id: &str) -> bool {
        match self.mode {
            ExecutionMode::StepByStep => true,
            ExecutionMode::Autonomous => false,
            ExecutionMode::Hybrid => self.pause_points.iter().any(|p| p == node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy {
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_ms: 100,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn retryable_error_filter() {
        let policy = RetryPolicy {
            retryable_errors: vec!["convoflow::mapping::timeout".into()],
            ..RetryPolicy::default()
        };
        assert!(policy.allows("convoflow::mapping::timeout"));
        assert!(!policy.allows("convoflow::mapping::workflow_not_found"));
        assert!(RetryPolicy::default().allows("anything"));
    }

    #[test]
    fn pause_points_only_apply_in_hybrid() {
        let config = ExecutionConfig {
            mode: ExecutionMode::Hybrid,
            pause_points: vec!["review".into()],
            ..ExecutionConfig::default()
        };
        assert!(config.is_pause_point("review"));
        assert!(!config.is_pause_point("other"));

        let autonomous = ExecutionConfig {
            mode: ExecutionMode::Autonomous,
            pause_points: vec!["review".into()],
            ..ExecutionConfig::default()
        };
        assert!(!autonomous.is_pause_point("review"));
    }
}
