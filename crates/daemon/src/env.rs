// SPDX-License-Identifier: MIT

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

fn duration_var(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Required variable or a startup error the caller turns into exit 1.
pub fn required(name: &str) -> Result<String, crate::config::ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| crate::config::ConfigError::Missing(name.to_string()))
}

pub fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Comma-separated list variable.
pub fn list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Orphan recovery sweep cadence.
pub fn recovery_interval() -> Duration {
    duration_var("PEERBOT_RECOVERY_INTERVAL_SECS", Duration::from_secs(5 * 60))
}

/// Idle scale-down sweep cadence.
pub fn idle_sweep_interval() -> Duration {
    duration_var("PEERBOT_IDLE_SWEEP_SECS", Duration::from_secs(60))
}

/// Reconciler-side idle window before scaling a thread to zero.
pub fn idle_after() -> Duration {
    duration_var("PEERBOT_IDLE_MINUTES", Duration::from_secs(5 * 60))
}

/// Rate-limit map eviction cadence.
pub fn rate_limit_eviction_interval() -> Duration {
    duration_var("PEERBOT_RATE_EVICT_SECS", Duration::from_secs(5 * 60))
}

/// Queue maintenance cadence.
pub fn maintenance_interval() -> Duration {
    duration_var("PEERBOT_QUEUE_MAINTENANCE_SECS", Duration::from_secs(60))
}

/// Advisory cleanup timer cadence.
pub fn cleanup_interval() -> Duration {
    duration_var("PEERBOT_CLEANUP_INTERVAL_SECS", Duration::from_secs(10 * 60))
}
