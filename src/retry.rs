//! Exponential backoff for connection and command retries.

use std::time::Duration;

use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;

/// Backoff policy shared by `Dial` and `Run`.
///
/// The policy is a pure function from attempt number to delay. The attempt
/// counter lives with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Number of retries allowed after the first failure.
    pub max_attempts: u32,
    /// Relative jitter applied to each delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            max_attempts: 5,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` without jitter.
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay before retry number `attempt`, with bounded random jitter.
    ///
    /// Jitter never pushes the delay above `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let spread = base.as_secs_f64() * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let max = Duration::from_millis(self.max_delay_ms).as_secs_f64();
        Duration::from_secs_f64((base.as_secs_f64() + offset).clamp(0.0, max))
    }

    /// Whether a failure of the given class should be retried.
    ///
    /// `attempt` is the number of retries already performed.
    pub fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool {
        class == ErrorClass::Transient && attempt < self.max_attempts
    }
}
