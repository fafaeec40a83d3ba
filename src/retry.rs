//! Exponential backoff shared by the HTTP clients.

use std::time::Duration;

/// Retry budget: `max_retries` extra attempts after the first, waiting
/// `base`, `2 × base`, `4 × base`, ... between them (capped at `32 × base`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_ms: u64) -> Self {
        Self {
            max_retries,
            base: Duration::from_millis(base_ms),
        }
    }

    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before attempt number `attempt` (0 is the first attempt).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base * (1u32 << (attempt - 1).min(5))
    }

    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
