// SPDX-License-Identifier: MIT

//! Typed daemon configuration assembled from the environment at startup.

use std::collections::HashSet;

use peerbot_cluster::ManifestConfig;

use crate::env;

/// Startup configuration errors — fatal, exit 1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
}

/// Everything the daemon needs, resolved once.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub slack_bot_token: String,
    /// Our own user id and bot id, for self-message filtering.
    pub bot_user_id: String,
    pub bot_id: String,
    /// Cluster namespace and worker image settings.
    pub manifest: ManifestConfig,
    /// Template for per-user connection strings; `{user}` and `{password}`
    /// are substituted.
    pub user_database_url_template: String,
    /// Empty allow list admits everyone (deny list still applies).
    pub allow_list: HashSet<String>,
    pub deny_list: HashSet<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let manifest = ManifestConfig {
            namespace: env::optional("PEERBOT_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            image: env::optional("PEERBOT_WORKER_IMAGE")
                .unwrap_or_else(|| "peerbot-worker:latest".to_string()),
            ..ManifestConfig::default()
        };

        Ok(Self {
            database_url: env::required("DATABASE_URL")?,
            slack_bot_token: env::required("SLACK_BOT_TOKEN")?,
            bot_user_id: env::required("SLACK_BOT_USER_ID")?,
            bot_id: env::optional("SLACK_BOT_ID").unwrap_or_default(),
            manifest,
            user_database_url_template: env::required("PEERBOT_USER_DATABASE_URL_TEMPLATE")?,
            allow_list: env::list("PEERBOT_ALLOWED_USERS").into_iter().collect(),
            deny_list: env::list("PEERBOT_DENIED_USERS").into_iter().collect(),
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
