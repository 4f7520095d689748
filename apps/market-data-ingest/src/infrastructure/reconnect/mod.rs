//! Connect Retry Policy
//!
//! Exponential backoff with jitter between upstream connection attempts.
//! The orchestrator asks the policy for the delay before each retry; the
//! policy answers `None` once the attempt budget is spent.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::IngestConfig;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor applied after every retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Total connection attempts, including the first (0 = unlimited).
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
    /// Build from service configuration.
    #[must_use]
    pub const fn from_config(config: &IngestConfig) -> Self {
        Self {
            initial_delay: config.reconnect.initial_delay,
            max_delay: config.reconnect.max_delay,
            multiplier: config.reconnect.multiplier,
            jitter_factor: 0.1,
            max_attempts: config.reconnect.max_attempts,
        }
    }

    /// Disable jitter; delays become deterministic.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Stateful backoff over a sequence of failed connection attempts.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use market_data_ingest::infrastructure::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     initial_delay: Duration::from_millis(100),
///     max_attempts: 3,
///     ..ReconnectConfig::default()
/// }.without_jitter());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(policy.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    retries: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, retries: 0 }
    }

    /// Delay to wait before the next attempt, or `None` when the attempt
    /// budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        let delay = self.backoff(self.retries);
        self.retries += 1;
        Some(self.apply_jitter(delay))
    }

    /// Forget past failures after a successful connection.
    pub const fn reset(&mut self) {
        self.retries = 0;
    }

    /// Attempts made so far (the first attempt plus every retry handed out).
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.retries + 1
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count() < self.config.max_attempts
    }

    fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.config.initial_delay.as_millis() as f64 * factor).round();
        #[allow(clippy::cast_precision_loss)]
        let max_millis = self.config.max_delay.as_millis() as f64;
        if !scaled.is_finite() || scaled >= max_millis {
            return self.config.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = scaled as u64;
        Duration::from_millis(millis)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        #[allow(clippy::cast_precision_loss)]
        let base = delay.as_millis() as f64;
        let spread = base * self.config.jitter_factor;
        let jitter = rand::rng().random_range(-spread..=spread);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base + jitter).round().max(1.0) as u64;
        Duration::from_millis(millis)
    }
}
