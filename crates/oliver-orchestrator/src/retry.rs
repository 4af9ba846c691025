use oliver_core::OliverError;
use std::time::Duration;

/// Exponential backoff between workflow step attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Same delays, different retry count.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// First attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff(self, attempt))
    }
}

fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// Whether a spawn error is worth another attempt.
///
/// Only a full admission ceiling clears up on its own; an unknown agent type never does.
pub fn is_retryable(err: &OliverError) -> bool {
    matches!(err, OliverError::CapacityExceeded { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff(10), Duration::from_millis(30_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(30_000));
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 1);
        assert_eq!(RetryPolicy::default().with_retries(2).max_attempts(), 3);
        assert_eq!(RetryPolicy::default().with_retries(u32::MAX).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable(&OliverError::CapacityExceeded { active: 3, limit: 3 }));
        assert!(!is_retryable(&OliverError::AgentNotFound("x".into())));
    }
}
