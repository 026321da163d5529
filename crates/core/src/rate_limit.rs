// SPDX-License-Identifier: MIT

//! Fixed-window per-user admission control.
//!
//! State is local to one dispatcher instance and best-effort by design:
//! replicas each enforce the limit independently, which is acceptable per
//! the shared-resource policy. The map is swept periodically by a scheduler
//! task calling [`RateLimiter::evict_expired`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::clock::Clock;

/// Rate-limiter tuning.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Admitted jobs per user per window.
    pub max_jobs: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_jobs: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

struct Window {
    started_at_ms: u64,
    count: u32,
}

/// Fixed-window counter keyed by user id.
///
/// Unauthenticated events land in the empty-string bucket, so a missing
/// user id cannot bypass admission control.
pub struct RateLimiter<C: Clock> {
    config: RateLimitConfig,
    clock: C,
    windows: Mutex<HashMap<String, Window>>,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(config: RateLimitConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for `user_id`.
    ///
    /// Admission increments the current window's counter; a request that
    /// arrives after the window expired starts a fresh window. Rejection
    /// leaves the counter untouched.
    pub fn admit(&self, user_id: &str) -> bool {
        let now_ms = self.clock.epoch_ms();
        let window_ms = self.config.window.as_millis() as u64;
        let mut windows = self.windows.lock();

        let window = windows.entry(user_id.to_string()).or_insert(Window {
            started_at_ms: now_ms,
            count: 0,
        });

        if now_ms.saturating_sub(window.started_at_ms) >= window_ms {
            window.started_at_ms = now_ms;
            window.count = 0;
        }

        if window.count < self.config.max_jobs {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Remove entries whose window has fully elapsed. Returns the number
    /// of evicted entries.
    pub fn evict_expired(&self) -> usize {
        let now_ms = self.clock.epoch_ms();
        let window_ms = self.config.window.as_millis() as u64;
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now_ms.saturating_sub(w.started_at_ms) < window_ms);
        before - windows.len()
    }

    /// Number of tracked users (expired entries included until swept).
    pub fn tracked_users(&self) -> usize {
        self.windows.lock().len()
    }

    /// Remaining admissions for a user in the current window.
    pub fn remaining(&self, user_id: &str) -> u32 {
        let now_ms = self.clock.epoch_ms();
        let window_ms = self.config.window.as_millis() as u64;
        let windows = self.windows.lock();
        match windows.get(user_id) {
            Some(w) if now_ms.saturating_sub(w.started_at_ms) < window_ms => {
                self.config.max_jobs.saturating_sub(w.count)
            }
            _ => self.config.max_jobs,
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
