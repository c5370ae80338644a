use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_CAP_DELAY_MS: u64 = 10_000;

/// Exponential backoff between connection attempts.
///
/// After the `k`-th failed attempt the session waits
/// `min(base * 2^(k-1), cap)`. The delay is deterministic; no jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    cap_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            cap_delay: Duration::from_millis(DEFAULT_CAP_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, cap_delay: Duration) -> Self {
        Self {
            base_delay,
            cap_delay: cap_delay.max(base_delay),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.cap_delay)
    }
}
