//! Reconnect backoff calculation.
//!
//! Sync-only building blocks; the reconnect loop in `maas-ws` owns the
//! sleeping and the randomness.

use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff with jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; `0.5` yields the
/// un-jittered delay.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

/// Reconnect schedule state for one transport.
#[derive(Clone, Debug)]
pub struct Backoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Create a schedule. `max_attempts == 0` retries forever.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor,
            max_attempts,
            attempt: 0,
        }
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self, random: f64) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }
        let ms = backoff_delay_ms(
            self.attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        );
        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis(ms))
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_JITTER_FACTOR, 0)
    }
}
