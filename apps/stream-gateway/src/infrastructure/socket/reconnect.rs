//! Reconnection Policy
//!
//! Exponential backoff for re-establishing the panel's streaming connection:
//! `delay = min(interval * 2^(attempt-1), 30s)`, with a bounded attempt
//! budget. Jitter is available but off by default so delays stay exact.

use std::time::Duration;

use rand::Rng;

/// Hard cap on any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay; the first retry waits exactly this long.
    pub interval: Duration,
    /// Maximum number of reconnection attempts (0 = never reconnect).
    pub max_attempts: u32,
    /// Jitter factor as a fraction (e.g. 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 5,
            jitter_factor: 0.0,
        }
    }
}

/// Backoff schedule tracker for one connection.
///
/// `next_delay` hands out the wait before each attempt and advances the
/// attempt counter; `reset` is called after a successful connect.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay before the next attempt, or `None` once the attempt
    /// budget is exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;

        // interval * 2^(attempt-1), saturating, capped at MAX_BACKOFF
        let exponent = self.attempt_count.saturating_sub(1).min(31);
        let scaled = self
            .config
            .interval
            .saturating_mul(1_u32.checked_shl(exponent).unwrap_or(u32::MAX));
        let capped = scaled.min(MAX_BACKOFF);

        Some(self.apply_jitter(capped))
    }

    /// Reset the schedule after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is still within budget.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted_millis as u64)
    }
}
