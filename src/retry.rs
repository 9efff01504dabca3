// SPDX-License-Identifier: PMPL-1.0-or-later

//! Exponential backoff for operations that may fail transiently.

use std::time::Duration;

use tracing::warn;

use crate::config::NetworkConfig;
use crate::error::Result;

/// Retry with waits of `multiplier * 2^(n-1)` seconds clamped to
/// `[min, max]`, for at most `max_attempts` attempts in total.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    multiplier: f64,
    min: f64,
    max: f64,
    sleep: fn(Duration),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, multiplier: f64, min: f64, max: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            multiplier,
            min,
            max,
            sleep: std::thread::sleep,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(
            config.max_retries,
            config.backoff_multiplier_secs,
            config.backoff_min_secs,
            config.backoff_max_secs,
        )
    }

    /// Replace the sleep function; tests use a no-op.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = (self.multiplier * 2f64.powi(exponent)).clamp(self.min, self.max);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// The closure receives the 1-based attempt number.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{what} failed (attempt {attempt}/{}): {e}; retrying in {:.1}s",
                        self.max_attempts,
                        delay.as_secs_f64()
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
