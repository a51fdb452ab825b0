use crate::utils::toml_config::CoordinatorSettings;
use crate::workers::WorkerFailure;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded re-dispatch of a step after retryable failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl From<&CoordinatorSettings> for RetryPolicy {
    fn from(settings: &CoordinatorSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay_ms: settings.retry_backoff_ms,
            max_delay_ms: settings.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Whether a failure on 1-based `attempt` earns another dispatch.
    pub fn should_retry(&self, failure: &WorkerFailure, attempt: u32) -> bool {
        failure.kind.is_retryable() && attempt <= self.max_retries
    }

    /// Delay after 1-based `attempt` failed: doubles per attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::FailureKind;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(60), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_bound_and_kind() {
        let policy = RetryPolicy::immediate(3);
        let transient = WorkerFailure::transient("timeout");
        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&transient, 4));

        let shape = WorkerFailure::new(FailureKind::InvalidOutputShape, "not a chart");
        assert!(!policy.should_retry(&shape, 1));
    }

    #[test]
    fn test_from_settings() {
        let policy = RetryPolicy::from(&CoordinatorSettings::default());
        assert_eq!(policy, RetryPolicy::default());
    }
}
