use rand::Rng;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded exponential backoff for completion calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per case, first call included. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 10% random delay on top of each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    /// A server hint replaces the exponential value; both are capped.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = hint.unwrap_or_else(|| self.base_delay.saturating_mul(1 << exp));
        let capped = base.min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let extra_ms = capped.as_millis() as u64 / 10;
        let jitter = rand::thread_rng().gen_range(0..=extra_ms);
        capped + Duration::from_millis(jitter)
    }
}
