// SPDX-License-Identifier: MIT

//! Cluster API boundary.
//!
//! A narrow trait over the Deployment/Secret operations the orchestrator
//! needs. The production implementation is [`crate::KubeCluster`]; tests
//! run against [`crate::fake::FakeCluster`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::BTreeMap;

/// Label selector matching every worker deployment we manage.
pub const SELECTOR_WORKERS: &str = "app=worker,managed-by=orchestrator";

/// Cluster operation errors, split along the retry boundary.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource-version conflict; the caller lost a write race and should
    /// re-read.
    #[error("conflict on {0}")]
    Conflict(String),

    /// Other 4xx — permanent for this operation.
    #[error("cluster api rejected request ({code}): {message}")]
    Api { code: u16, message: String },

    /// 5xx / transport-level failure; retryable.
    #[error("cluster transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClusterError::Transport(_))
    }
}

/// Flattened view of a Deployment, read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentView {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Desired replicas (`spec.replicas`).
    pub replicas: i32,
    /// Observed ready replicas.
    pub ready_replicas: i32,
    /// A `Progressing=False` condition was observed.
    pub progressing_false: bool,
    pub created_at_ms: u64,
}

impl DeploymentView {
    /// Raw session key from the deployment's annotation.
    pub fn session_key(&self) -> Option<&str> {
        self.annotations.get("session-key").map(String::as_str)
    }

    /// Age relative to `now_ms`, in whole minutes.
    pub fn age_minutes(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms) / 60_000
    }
}

/// Deployment/Secret CRUD plus label-selector queries.
///
/// Every write is idempotent or conflict-checked; callers resolve
/// [`ClusterError::Conflict`] by re-reading.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    async fn get_deployment(&self, name: &str) -> Result<Option<DeploymentView>, ClusterError>;

    async fn list_deployments(&self, selector: &str) -> Result<Vec<DeploymentView>, ClusterError>;

    async fn create_deployment(&self, manifest: &Deployment) -> Result<(), ClusterError>;

    /// Patch `spec.replicas`.
    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ClusterError>;

    /// Delete with background propagation.
    async fn delete_deployment(&self, name: &str) -> Result<(), ClusterError>;

    /// Merge-patch one annotation onto a deployment.
    async fn annotate_deployment(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError>;

    /// Read a secret's decoded key/value pairs. `None` when absent.
    async fn get_secret(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    /// Create the secret if needed and merge the given keys into it.
    async fn apply_secret_keys(
        &self,
        name: &str,
        entries: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Remove keys from a secret. Missing secret or keys are fine.
    async fn delete_secret_keys(&self, name: &str, keys: &[String]) -> Result<(), ClusterError>;

    /// Delete a secret outright. Missing secret is fine.
    async fn delete_secret(&self, name: &str) -> Result<(), ClusterError>;
}
