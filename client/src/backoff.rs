//! Reconnect backoff: exponential delay, doubling per attempt, with a delay
//! ceiling and a hard attempt cap.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Retries allowed before the client gives up with
    /// `ReconnectExhausted`.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// attempt cap is reached.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max_delay))
    }
}
