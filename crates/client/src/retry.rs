//! Retry policy
//!
//! Exponential backoff for throttling responses. The delay for attempt
//! `n` (zero-based) is `(1 << n) * interval`, plus a small random jitter
//! so a fleet of clients throttled together does not retry in lockstep.

use std::time::Duration;

use rand::Rng;

/// Cap on the backoff exponent so the shift cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Configuration for the retry response handler.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries allowed per request on top of the first attempt
    pub max_retries: u32,
    /// Base delay, doubled on each successive attempt
    pub interval: Duration,
    /// Status codes that trigger a backoff-and-resend
    pub retry_codes: Vec<u16>,
    /// Upper bound on the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 6,
            interval: Duration::from_millis(500),
            retry_codes: vec![429, 504],
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryConfig {
    pub fn is_retryable(&self, code: u16) -> bool {
        self.retry_codes.contains(&code)
    }
}

/// Pure exponential backoff for the given attempt count.
pub fn backoff(num_attempts: u32, interval: Duration) -> Duration {
    interval * (1u32 << num_attempts.min(MAX_BACKOFF_EXPONENT))
}

/// Random jitter in `0..=max`.
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max.as_millis() as u64))
}
