//! Exponential backoff with jitter for provider retries.

use crate::domain::error::{AppError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const JITTER_MIN: f64 = 0.5;
pub const JITTER_MAX: f64 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Un-jittered delay before retry number `attempt` (0-based), capped at
    /// `max_delay_ms`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay scaled by a caller-supplied jitter factor.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        self.base_delay(attempt)
            .mul_f64(jitter.clamp(JITTER_MIN, JITTER_MAX))
    }

    /// Delay with jitter drawn uniformly from `[0.5, 1.5)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(JITTER_MIN..JITTER_MAX);
        self.delay_with_jitter(attempt, jitter)
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
