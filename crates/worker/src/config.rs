// SPDX-License-Identifier: MIT

//! Worker configuration from the container environment.
//!
//! Everything is injected by the deployment manifest: identity as plain
//! env, credentials from mounted secrets. A missing variable is a startup
//! misconfiguration and the process exits 1.

use std::path::PathBuf;
use std::time::Duration;

use peerbot_core::SessionKey;

/// Startup misconfiguration — exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
}

/// The worker's resolved environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub session_key: SessionKey,
    pub user_id: String,
    pub username: String,
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub repository_url: String,
    pub deployment_name: String,
    pub database_url: String,
    pub hosting_token: String,
    pub agent_token: String,
    pub exit_on_idle: Duration,
    pub workspace_path: PathBuf,
}

fn required(name: &str) -> Result<String, WorkerConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkerConfigError::Missing(name.to_string()))
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerConfigError> {
        let exit_on_idle_minutes = std::env::var("EXIT_ON_IDLE_MINUTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);

        Ok(Self {
            session_key: SessionKey::from_raw(required("SESSION_KEY")?),
            user_id: required("USER_ID")?,
            username: required("USERNAME")?,
            channel_id: required("CHANNEL_ID")?,
            thread_ts: std::env::var("THREAD_TS").ok().filter(|s| !s.is_empty()),
            repository_url: required("REPOSITORY_URL")?,
            deployment_name: required("DEPLOYMENT_NAME")?,
            database_url: required("DATABASE_URL")?,
            hosting_token: required("HOSTING_TOKEN")?,
            agent_token: required("AGENT_TOKEN")?,
            exit_on_idle: Duration::from_secs(exit_on_idle_minutes * 60),
            workspace_path: PathBuf::from(
                std::env::var("WORKSPACE_PATH").unwrap_or_else(|_| "/workspace".to_string()),
            ),
        })
    }

    /// Queue this worker consumes.
    pub fn thread_queue(&self) -> String {
        peerbot_core::thread_queue_name(&self.deployment_name)
    }

    /// Session branch this worker commits to.
    pub fn branch(&self) -> String {
        peerbot_core::branch_name(&self.session_key)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
