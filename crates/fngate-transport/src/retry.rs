//! Exponential backoff with jitter for outbound requests.
//!
//! The delay before retry `n` (zero-based) is
//! `min(initial_delay * backoff_multiplier^n, max_delay)` plus a random
//! jitter of up to `jitter_factor` of that delay. A `Retry-After` from a 429
//! replaces the computed delay, capped at `max_retry_after`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Largest accepted jitter factor.
pub const MAX_JITTER_FACTOR: f64 = 0.3;

/// Retry policy for platform requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the computed delay before jitter.
    pub max_delay: Duration,
    /// Growth factor between retries.
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay, `0.0..=0.3`.
    pub jitter_factor: f64,
    /// Upper bound for delays requested through `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: MAX_JITTER_FACTOR,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Retries allowed after the first attempt.
    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Checks the policy for nonsensical values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err("backoff_multiplier must be at least 1".to_string());
        }
        if !(0.0..=MAX_JITTER_FACTOR).contains(&self.jitter_factor) {
            return Err(format!("jitter_factor must be between 0 and {MAX_JITTER_FACTOR}"));
        }
        if self.initial_delay > self.max_delay {
            return Err("initial_delay must not exceed max_delay".to_string());
        }
        Ok(())
    }

    /// Delay before retry `retry_index` without jitter.
    ///
    /// Non-decreasing in `retry_index` and never above `max_delay`.
    pub fn base_delay(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index.min(64)).unwrap_or(64);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if secs.is_finite() && secs < max_secs {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Delay before retry `retry_index` with jitter drawn from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, retry_index: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry_index);
        let factor = self.jitter_factor.clamp(0.0, MAX_JITTER_FACTOR);
        if factor == 0.0 || base.is_zero() {
            return base;
        }
        base + base.mul_f64(rng.random_range(0.0..=factor))
    }

    /// Delay before retry `retry_index` with thread-local randomness.
    pub fn delay(&self, retry_index: u32) -> Duration {
        self.delay_with(retry_index, &mut rand::rng())
    }

    /// Delay after `error`, honouring `Retry-After`.
    pub fn delay_after(&self, retry_index: u32, error: &TransportError) -> Duration {
        match error.retry_after() {
            Some(requested) => requested.min(self.max_retry_after),
            None => self.delay(retry_index),
        }
    }
}
