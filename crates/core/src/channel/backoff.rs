// crates/core/src/channel/backoff.rs
//! Exponential delay schedule for the polling fallback.

use std::time::Duration;

use crate::config::PollConfig;

/// Infinite iterator of poll delays:
/// `min(initial * factor^(n-1), max)` for the n-th poll.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: f64,
    factor: f64,
    max_ms: f64,
}

impl Backoff {
    pub fn new(policy: &PollConfig) -> Self {
        let max_ms = policy.max_delay_ms as f64;
        Self {
            next_ms: (policy.initial_delay_ms as f64).min(max_ms),
            factor: policy.growth_factor,
            max_ms,
        }
    }

    /// Closed form of the n-th delay (1-based).
    pub fn delay_for_attempt(policy: &PollConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = policy.initial_delay_ms as f64 * policy.growth_factor.powi(exponent);
        Duration::from_millis(raw.min(policy.max_delay_ms as f64).round() as u64)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next_ms;
        self.next_ms = (current * self.factor).min(self.max_ms);
        Some(Duration::from_millis(current.round() as u64))
    }
}
