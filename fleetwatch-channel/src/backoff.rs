//! Exponential reconnect backoff.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and symmetric jitter.
///
/// `delay(n) = min(base * factor^n, cap)`, then scaled by a random factor in
/// `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (zero-based), before jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base.as_millis() as f64 * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = raw.min(self.cap.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `attempt` with random jitter applied.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let unit = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.apply_jitter(self.delay(attempt), unit)
    }

    /// Scale `delay` by `1 + unit * jitter`, where `unit` is in `[-1, 1]`.
    pub fn apply_jitter(&self, delay: Duration, unit: f64) -> Duration {
        let scale = 1.0 + unit.clamp(-1.0, 1.0) * self.jitter;
        Duration::from_millis((delay.as_millis() as f64 * scale).max(0.0).round() as u64)
    }
}
