use std::time::Duration;

/// Exponential backoff for a target's check interval.
///
/// The first failure retries at the base interval; every further consecutive
/// failure doubles the delay up to `max`. A single success resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
}

// 2^20 times any sane interval is already beyond every max we accept
const MAX_EXPONENT: u32 = 20;

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next check given the failures recorded so far.
    pub fn next_interval(&self) -> Duration {
        let exponent = self
            .consecutive_failures
            .saturating_sub(1)
            .min(MAX_EXPONENT);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
