//! Reconnection budget and delay schedule for the tracking feed.

use std::time::Duration;

use pawtrail_core::config::TrackingConfig;

/// Capped exponential backoff.
///
/// Attempt `n` (1-based, counted after the increment) waits
/// `2^n * base_delay`. Once `max_attempts` reconnections have failed the
/// feed is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.base_delay(),
        }
    }

    /// Delay before reconnection attempt `attempt`. Saturates instead of
    /// overflowing for large attempt numbers.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_two_seconds() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 32000]);
    }

    #[test]
    fn budget_is_exhausted_at_max() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
        assert!(policy.exhausted(6));
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(40), Duration::MAX);
    }

    #[test]
    fn from_config_uses_configured_values() {
        let config = TrackingConfig {
            max_reconnect_attempts: 3,
            base_delay_ms: 250,
            connect_timeout_secs: 5,
        };
        let policy = ReconnectPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }
}
