//! Retry with exponential backoff and jitter for idempotent insurer calls.
//!
//! Retries transient failures (transport errors and 5xx) with exponential
//! backoff and ±20 % jitter. Never retries 4xx. `bind` uses a budget of
//! zero at the adapter layer — the purchase coordinator owns bind retry.

use rand::Rng;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
    /// Symmetric jitter fraction applied to each delay (0.2 = ±20 %).
    pub jitter_pct: f64,
    /// Per-attempt deadline.
    pub attempt_deadline: Duration,
    /// Overall operation deadline across all attempts.
    pub overall_deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_pct: 0.2,
            attempt_deadline: Duration::from_secs(10),
            overall_deadline: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Config for a non-idempotent operation: a single attempt.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// The purchase coordinator's bind schedule: base 1 s, factor 2, no
    /// per-attempt cap beyond the overall deadline.
    pub fn bind_schedule(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            jitter_pct: 0.0,
            ..Default::default()
        }
    }

    /// Backoff delay before retry number `attempt` (0-indexed), with jitter
    /// applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        if self.jitter_pct <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter_pct..=1.0 + self.jitter_pct);
        Duration::from_secs_f64(base * factor)
    }
}
