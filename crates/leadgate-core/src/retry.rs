//! Retry policy with exponential backoff and optional jitter.

use std::time::Duration;

use crate::classifier::ClassifiedError;

/// Decides whether and when a failed upstream attempt is retried.
///
/// `attempt` is the 1-based number of the attempt that just failed, so
/// `max_retries` bounds the total number of transport attempts per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
    /// Applies random jitter (+/- 50%) to the capped delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: Duration::from_secs(300),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        error.retryable() && attempt < self.max_retries
    }

    /// Backoff before the attempt following `attempt`.
    ///
    /// The base is the error's `retry_after`, doubled per prior attempt and
    /// capped at `max_delay`. Terminal errors yield `Duration::ZERO`.
    pub fn retry_delay(&self, error: &ClassifiedError, attempt: u32) -> Duration {
        if !error.retryable() {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let seconds = error.retry_after().as_secs_f64() * 2_f64.powi(exponent);
        let capped = seconds.min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped);

        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
            let random_offset = fastrand::u64(0..=(jitter_ms * 2));
            let total_ms = delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
            Duration::from_millis(total_ms.max(0) as u64)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, ClassifiedError, ErrorKind};

    fn server_error() -> ClassifiedError {
        classify(500, "internal server error")
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_delay, Duration::from_secs(300));
        assert!(!policy.jitter);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::default();
        let error = server_error();

        assert_eq!(policy.retry_delay(&error, 1), Duration::from_secs(30));
        assert_eq!(policy.retry_delay(&error, 2), Duration::from_secs(60));
        assert_eq!(policy.retry_delay(&error, 3), Duration::from_secs(120));
        assert_eq!(policy.retry_delay(&error, 4), Duration::from_secs(240));
        assert_eq!(policy.retry_delay(&error, 5), Duration::from_secs(300)); // capped
        assert_eq!(policy.retry_delay(&error, 40), Duration::from_secs(300));
    }

    #[test]
    fn test_terminal_errors_never_retry() {
        let policy = RetryPolicy::default();
        let error = classify(401, "incorrect api key");

        assert!(!policy.should_retry(&error, 1));
        assert_eq!(policy.retry_delay(&error, 1), Duration::ZERO);
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let policy = RetryPolicy::new(3);
        let error = server_error();

        assert!(policy.should_retry(&error, 1));
        assert!(policy.should_retry(&error, 2));
        assert!(!policy.should_retry(&error, 3));
        assert!(!RetryPolicy::no_retry().should_retry(&error, 0));
    }

    #[test]
    fn test_delay_uses_error_retry_after() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(3_600));
        let error = ClassifiedError::new(ErrorKind::RateLimitShort, Some(429), "slow down")
            .with_retry_after(Duration::from_secs(7));

        assert_eq!(policy.retry_delay(&error, 1), Duration::from_secs(7));
        assert_eq!(policy.retry_delay(&error, 2), Duration::from_secs(14));
    }

    #[test]
    fn test_jitter_stays_within_half_of_delay() {
        let policy = RetryPolicy::default().with_jitter(true);
        let error = server_error();

        for _ in 0..10 {
            for attempt in 1..5 {
                let delay_ms = policy.retry_delay(&error, attempt).as_millis() as f64;
                let expected = (30_000.0 * 2_f64.powi(attempt as i32 - 1)).min(300_000.0);

                assert!(delay_ms >= expected * 0.49, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected * 1.51, "attempt={attempt}, delay_ms={delay_ms}");
            }
        }
    }
}
