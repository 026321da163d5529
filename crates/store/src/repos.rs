// SPDX-License-Identifier: MIT

//! Username → repository directory with TTL caching.
//!
//! The hosting API is slow and rate-limited; lookups are cached for a few
//! minutes. The cache is advisory — a stale URL fails at clone time and
//! the retry re-resolves.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use peerbot_core::Clock;

/// Repository resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("no repository for user {0}")]
    NotFound(String),

    /// Hosting API unreachable; retryable.
    #[error("hosting api error: {0}")]
    Hosting(String),
}

/// Git-hosting boundary: resolve the per-user repository.
#[async_trait]
pub trait GitHosting: Send + Sync + 'static {
    async fn lookup_repository(&self, username: &str) -> Result<String, RepoError>;
}

struct CacheEntry {
    url: String,
    cached_at_ms: u64,
}

/// TTL cache over a [`GitHosting`] implementation.
pub struct CachedRepoDirectory<C: Clock> {
    hosting: Arc<dyn GitHosting>,
    clock: C,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<C: Clock> CachedRepoDirectory<C> {
    pub fn new(hosting: Arc<dyn GitHosting>, clock: C) -> Self {
        Self::with_ttl(hosting, clock, Duration::from_secs(5 * 60))
    }

    pub fn with_ttl(hosting: Arc<dyn GitHosting>, clock: C, ttl: Duration) -> Self {
        Self {
            hosting,
            clock,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, username: &str) -> Result<String, RepoError> {
        let now_ms = self.clock.epoch_ms();
        let ttl_ms = self.ttl.as_millis() as u64;

        if let Some(entry) = self.cache.lock().get(username) {
            if now_ms.saturating_sub(entry.cached_at_ms) < ttl_ms {
                return Ok(entry.url.clone());
            }
        }

        let url = self.hosting.lookup_repository(username).await?;
        tracing::debug!(username, %url, "resolved repository");
        self.cache.lock().insert(
            username.to_string(),
            CacheEntry {
                url: url.clone(),
                cached_at_ms: now_ms,
            },
        );
        Ok(url)
    }

    /// Drop a cached entry (after a failed clone, say).
    pub fn invalidate(&self, username: &str) {
        self.cache.lock().remove(username);
    }
}

/// Hosting backed by a URL template: `{username}` is substituted into a
/// per-user repository URL. Matches the bot-org convention where every
/// user gets `<org>/<username>-workspace`.
pub struct TemplateHosting {
    template: String,
}

impl TemplateHosting {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl GitHosting for TemplateHosting {
    async fn lookup_repository(&self, username: &str) -> Result<String, RepoError> {
        if username.is_empty() {
            return Err(RepoError::NotFound(username.to_string()));
        }
        Ok(self.template.replace("{username}", username))
    }
}

/// Fixed-map hosting for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct StaticHosting {
    repos: std::sync::Arc<Mutex<HashMap<String, String>>>,
    lookups: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[cfg(any(test, feature = "test-support"))]
impl StaticHosting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, username: &str, url: &str) {
        self.repos
            .lock()
            .insert(username.to_string(), url.to_string());
    }

    pub fn lookup_count(&self) -> u32 {
        self.lookups.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl GitHosting for StaticHosting {
    async fn lookup_repository(&self, username: &str) -> Result<String, RepoError> {
        self.lookups
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.repos
            .lock()
            .get(username)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(username.to_string()))
    }
}

#[cfg(test)]
#[path = "repos_tests.rs"]
mod tests;
