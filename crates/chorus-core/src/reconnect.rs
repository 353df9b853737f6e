//! Client reconnection policy.

use std::time::Duration;

/// Exponential backoff schedule for client reconnects.
///
/// Delay for attempt `k` (zero-based) is `base_delay * factor^k`, capped at
/// `cap`. The attempt counter resets whenever the client receives `ready`,
/// so a healthy connection always starts the schedule over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            factor: 2,
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the given zero-based attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .factor
            .checked_pow(attempt)
            .map_or(self.cap, |f| self.base_delay.saturating_mul(f));
        factor.min(self.cap)
    }

    /// Whether the given zero-based attempt number is still permitted.
    #[must_use]
    pub const fn allows_attempt(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_one_second() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..5)
            .map(|k| policy.delay_for_attempt(k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy {
            cap: Duration::from_secs(5),
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        // Even an overflowing exponent stays at the cap.
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn five_attempts_then_exhausted() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(4));
        assert!(!policy.allows_attempt(5));
    }
}
