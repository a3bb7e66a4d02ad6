//! Fixed-window rate limiter
//!
//! This module implements in-memory admission control:
//! - Request count tracking per key (provider name, codebase id, ...)
//! - Window reset once the stored expiry has passed
//! - Periodic sweep of expired windows (memory hygiene only)
//!
//! Bursts of up to `2 * limit` are possible across a window boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admissions per window
    pub limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Counter for one key
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    expires_at: Instant,
}

/// Rate limit status for a key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub key: String,
    pub used: u32,
    pub limit: u32,
    pub retry_after_ms: Option<u64>,
}

/// Fixed-window rate limiter shared by concurrent callers
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    /// Create a new rate limiter with default config
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self::with_window(config.limit, config.window())
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit one call for `key` if the current window still has room.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.lock_windows();

        let window = windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            expires_at: now + self.window,
        });

        if now > window.expires_at {
            window.count = 0;
            window.expires_at = now + self.window;
        }

        if window.count < self.limit {
            window.count += 1;
            true
        } else {
            debug!(key, limit = self.limit, "Rate limit exceeded");
            false
        }
    }

    /// Get current rate limit status for a key
    pub fn status(&self, key: &str) -> RateLimitStatus {
        let now = Instant::now();
        let windows = self.lock_windows();

        let (used, retry_after_ms) = match windows.get(key) {
            Some(window) if now <= window.expires_at => {
                let retry_after = (window.count >= self.limit).then(|| {
                    window.expires_at.saturating_duration_since(now).as_millis() as u64
                });
                (window.count, retry_after)
            }
            _ => (0, None),
        };

        RateLimitStatus {
            key: key.to_string(),
            used,
            limit: self.limit,
            retry_after_ms,
        }
    }

    /// Drop windows whose expiry has passed. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.lock_windows();
        let before = windows.len();
        windows.retain(|_, window| now <= window.expires_at);
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock_windows().len()
    }

    /// Periodically sweep expired windows until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = (limiter.window * 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "Swept expired rate limit windows");
                        }
                    }
                }
            }
        })
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
