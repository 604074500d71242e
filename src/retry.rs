use std::time::Duration;

/// Capped exponential backoff: attempt `n` (0-based) waits `base * 2^n`,
/// never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            max_attempts,
        )
    }

    /// Delay to wait after failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// True when another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}
