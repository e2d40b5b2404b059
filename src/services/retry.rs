use crate::services::conversion::ConversionError;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt` (1-based retry index)
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// Linear backoff with a cap: retry `k` waits `min(k * step, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    step: Duration,
    cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(2),
            cap: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(step: Duration, cap: Duration) -> Self {
        Self { step, cap }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }

    /// Decide whether a job that has already been retried `retry_count`
    /// times gets another attempt.
    pub fn decide(&self, error: &ConversionError, retry_count: u32, max_retries: u32) -> RetryDecision {
        if !error.is_retryable() || retry_count >= max_retries {
            return RetryDecision::GiveUp;
        }

        let attempt = retry_count + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.backoff(attempt),
        }
    }
}
