//! Reconnection Policy
//!
//! Exponential backoff with jitter between a close and the replay of the
//! closed subscription. Policies are kept per endpoint, because every
//! reconnect creates a fresh connection and the attempt count has to survive
//! it. An endpoint's policy is reset once it opens again.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::domain::subscription::EndpointId;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Zero reconnects
    /// immediately.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Maximum consecutive attempts without an open in between (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Reconnect immediately, without backoff or attempt limit.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Error type for reconnection failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

/// Backoff state of one endpoint.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy in its initial state.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] once the configured
    /// number of attempts has been handed out.
    pub fn next_delay(&mut self) -> Result<Duration, ReconnectError> {
        let max = self.config.max_attempts;
        if max > 0 && self.attempt_count >= max {
            return Err(ReconnectError::MaxAttemptsExceeded(max));
        }
        self.attempt_count += 1;

        let delay = self.jittered(self.current_delay);
        self.current_delay = self.scaled(self.current_delay);
        Ok(delay)
    }

    /// Back to the initial delay, after a successful open.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn scaled(&self, delay: Duration) -> Duration {
        let millis = (delay.as_millis() as f64 * self.config.multiplier).round();
        let millis = if millis.is_finite() && millis > 0.0 {
            millis as u128
        } else {
            0
        };
        let capped = millis.min(self.config.max_delay.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let base = delay.as_millis() as f64;
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}

/// Per-endpoint reconnect policies.
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    policies: Mutex<HashMap<EndpointId, ReconnectPolicy>>,
}

impl ReconnectBackoff {
    /// Create an empty table using `config` for every endpoint.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            policies: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next replay of `endpoint_id`.
    ///
    /// # Errors
    ///
    /// Returns an error once the endpoint has used up its attempts.
    pub fn next_delay(&self, endpoint_id: &str) -> Result<Duration, ReconnectError> {
        let mut policies = self.policies.lock();
        policies
            .entry(endpoint_id.to_string())
            .or_insert_with(|| ReconnectPolicy::new(self.config))
            .next_delay()
    }

    /// Forget the backoff state of `endpoint_id`.
    pub fn reset(&self, endpoint_id: &str) {
        self.policies.lock().remove(endpoint_id);
    }

    /// Forget every endpoint's backoff state.
    pub fn clear(&self) {
        self.policies.lock().clear();
    }

    /// Number of endpoints with backoff state.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.policies.lock().len()
    }

    /// Attempts made for `endpoint_id` since it last opened.
    #[must_use]
    pub fn attempts(&self, endpoint_id: &str) -> u32 {
        self.policies
            .lock()
            .get(endpoint_id)
            .map_or(0, ReconnectPolicy::attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn exact(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn delays_grow_and_cap() {
        let mut policy = ReconnectPolicy::new(exact(100, 350, 2.0, 0));
        let delays: Vec<_> = (0..4).map(|_| policy.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn immediate_config_never_waits() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::immediate());
        for _ in 0..10 {
            assert_eq!(policy.next_delay().unwrap(), Duration::ZERO);
        }
    }

    #[test]
    fn attempts_exhausted() {
        let mut policy = ReconnectPolicy::new(exact(10, 100, 2.0, 2));
        assert_ok!(policy.next_delay());
        assert_ok!(policy.next_delay());
        let err = assert_err!(policy.next_delay());
        assert!(matches!(err, ReconnectError::MaxAttemptsExceeded(2)));

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(10));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }

    #[test]
    fn backoff_is_tracked_per_endpoint() {
        let backoff = ReconnectBackoff::new(exact(100, 10_000, 2.0, 0));
        assert_eq!(backoff.next_delay("a").unwrap(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay("a").unwrap(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay("b").unwrap(), Duration::from_millis(100));
        assert_eq!(backoff.attempts("a"), 2);

        backoff.reset("a");
        assert_eq!(backoff.attempts("a"), 0);
        assert_eq!(backoff.next_delay("a").unwrap(), Duration::from_millis(100));
    }
}
