//! Retry delay calculation.
//!
//! `delay = base * 2^attempt_count`, scaled by a random factor in
//! `[1 - jitter, 1 + jitter]` and capped at `max`. With the default ±20%
//! jitter the worst case of attempt `n + 1` (0.8 * 2 = 1.6x) still exceeds the
//! best case of attempt `n` (1.2x), so consecutive delays strictly grow until
//! the cap is reached.

use std::time::Duration;

use rand::Rng;

use relay_common::config::QueueConfig;

/// Default jitter fraction (±20%).
pub const DEFAULT_JITTER: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the nominal delay added or removed at random.
    pub jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: DEFAULT_JITTER,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        )
    }

    /// Same curve without randomness.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Un-jittered delay for a task that has been claimed `attempt_count` times.
    pub fn nominal(&self, attempt_count: i32) -> Duration {
        let exponent = attempt_count.clamp(0, 62);
        let secs = self.base.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// Delay before the task becomes visible again.
    pub fn delay(&self, attempt_count: i32) -> Duration {
        let exponent = attempt_count.clamp(0, 62);
        let nominal = self.base.as_secs_f64() * 2f64.powi(exponent);

        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };

        Duration::from_secs_f64((nominal * factor).min(self.max.as_secs_f64()))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
