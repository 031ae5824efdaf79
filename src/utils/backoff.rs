//! Capped exponential backoff.
//!
//! The delay before retry `n` (0-based) is `initial * multiplier^n`, capped at
//! `max`. The same schedule drives broker reconnection (unbounded attempts)
//! and HTTP delivery retries (bounded by the retry policy).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
        }
    }

    /// Convenience constructor for millisecond-based configuration values.
    pub fn from_millis(initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            multiplier,
        )
    }

    /// Delay to wait before retry number `retry` (0 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(millis as u64)
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
