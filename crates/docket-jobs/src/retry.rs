//! Retry policy for failed job attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before the first retry is doubled.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(30);

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 30;

/// Exponential backoff with a hard cap on failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts allowed before a job is marked failed.
    pub max_retries: u32,

    /// Delay unit, doubled once per recorded failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5)
    }
}

impl RetryPolicy {
    /// Creates a policy with the default 30 second base delay.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Returns true once `retry_count` failures have used up the budget.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Delay before the next attempt of a job that has failed
    /// `retry_count` times: `base_delay * 2^retry_count`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << retry_count.min(MAX_EXPONENT);
        self.base_delay.saturating_mul(factor)
    }
}
