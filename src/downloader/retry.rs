use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::errors::TaskError;

/// What a "no match" does to the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchPolicy {
    /// Consume a retry slot like any transient error.
    #[default]
    Retry,
    /// Go straight to `Failed`.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub no_match: NoMatchPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            no_match: NoMatchPolicy::Retry,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-indexed): `base * multiplier^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(0.0).powi(exponent);
        Duration::try_from_secs_f64(self.backoff_base.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }

    /// Whether a task that has already been retried `retry_count` times gets
    /// another attempt after failing with `error`.
    pub fn should_retry(&self, error: &TaskError, retry_count: u32) -> bool {
        if error.is_permanent() {
            return false;
        }
        if matches!(error, TaskError::NoMatchFound(_)) && self.no_match == NoMatchPolicy::FailFast {
            return false;
        }
        retry_count < self.max_retries
    }
}
