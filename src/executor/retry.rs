//! Retry policy for task attempts.

use std::time::Duration;

use rand::Rng;

use crate::error::{ExecutionError, LlmError};

/// How many extra attempts a task gets and how long to wait between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of the random jitter, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Whether `error` is worth another attempt.
    pub fn is_retryable(error: &ExecutionError) -> bool {
        match error {
            ExecutionError::GenerationTimeout { .. } => true,
            ExecutionError::Llm(e) => e.is_transient(),
            ExecutionError::ToolLoopExceeded { .. }
            | ExecutionError::Tool(_)
            | ExecutionError::Cancelled => false,
        }
    }

    /// `failed_attempts` counts attempts made so far, starting at 1.
    pub fn should_retry(&self, error: &ExecutionError, failed_attempts: u32) -> bool {
        failed_attempts <= self.max_retries && Self::is_retryable(error)
    }

    /// Backoff before retry number `retry` (0-based), with jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter)
        } else {
            0.0
        };
        base.mul_f64(1.0 + jitter).min(self.max_delay)
    }

    /// Delay for retrying after `error`; honours a backend's retry-after hint.
    pub fn delay_after(&self, error: &ExecutionError, retry: u32) -> Duration {
        if let ExecutionError::Llm(LlmError::RateLimited {
            retry_after: Some(after),
            ..
        }) = error
        {
            return (*after).min(self.max_delay);
        }
        self.delay_for(retry)
    }

    fn base_delay(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn retryable_errors() {
        let timeout = ExecutionError::GenerationTimeout {
            timeout: Duration::from_secs(1),
        };
        let transient = ExecutionError::Llm(LlmError::RequestFailed {
            provider: "p".into(),
            reason: "503".into(),
        });
        let auth = ExecutionError::Llm(LlmError::AuthFailed {
            provider: "p".into(),
        });
        let tool = ExecutionError::Tool(SandboxError::FileNotFound {
            path: "x".into(),
        });

        assert!(RetryPolicy::is_retryable(&timeout));
        assert!(RetryPolicy::is_retryable(&transient));
        assert!(!RetryPolicy::is_retryable(&auth));
        assert!(!RetryPolicy::is_retryable(&tool));
        assert!(!RetryPolicy::is_retryable(&ExecutionError::Cancelled));
        assert!(!RetryPolicy::is_retryable(&ExecutionError::ToolLoopExceeded {
            limit: 10
        }));
    }

    #[test]
    fn retry_budget_is_respected() {
        let policy = RetryPolicy::default();
        let err = ExecutionError::GenerationTimeout {
            timeout: Duration::from_secs(1),
        };
        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&err, 3));
        assert!(!RetryPolicy::none().should_retry(&err, 1));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            max_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(5), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn rate_limit_hint_overrides_backoff() {
        let policy = RetryPolicy::default();
        let err = ExecutionError::Llm(LlmError::RateLimited {
            provider: "p".into(),
            retry_after: Some(Duration::from_millis(1234)),
        });
        assert_eq!(policy.delay_after(&err, 0), Duration::from_millis(1234));
    }
}
