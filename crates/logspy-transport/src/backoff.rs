//! Reconnect backoff.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter: `min(max, base * 2^attempt) * [0.75, 1.25]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failed attempts before the stream gives up.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(32),
            max_retries: 10,
        }
    }
}

impl BackoffPolicy {
    /// Jittered delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::rng().random_range(0.75..=1.25))
    }

    /// Delay for `attempt` scaled by a fixed `jitter` factor.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponential = self.base.saturating_mul(2u32.saturating_pow(attempt));
        exponential.min(self.max).mul_f64(jitter)
    }
}

/// Delay before retry number `attempt` under the default policy.
#[must_use]
pub fn get_backoff_delay(attempt: u32) -> Duration {
    BackoffPolicy::default().delay(attempt)
}
