//! Exponential backoff and the retry cap.

use std::time::Duration;

/// Backoff schedule shared by automatic and manual retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries granted to one job (not counting the first attempt).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// 1s base, 16s cap, with the given retry budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(16_000),
        }
    }

    /// `min(base * 2^retry_count, max)`, where `retry_count` is the value
    /// before it is incremented for the upcoming retry.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        // 2^31 already exceeds any sane cap; clamp the shift to avoid overflow.
        let factor = 1u32 << retry_count.min(31);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether a job that has used `retry_count` retries may retry again.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }
}
