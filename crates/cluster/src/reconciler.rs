// SPDX-License-Identifier: MIT

//! Deployment reconciler: converge one session key to one running worker.
//!
//! The cluster's resource versions provide all the locking. When two
//! reconciliations race for the same key, the loser's create comes back
//! 409; it re-reads and returns the winner's deployment. No in-process
//! lock exists to get stale.

use std::time::Duration;

use peerbot_core::{deployment_name, Clock, SessionKey};

use crate::api::{ClusterApi, ClusterError, DeploymentView};
use crate::manifest::{build_deployment, ManifestConfig, WorkerSpec};

/// Reconciler tuning knobs.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Deployment status poll cadence while waiting for readiness.
    pub monitor_interval: Duration,
    /// Ceiling on readiness monitoring; past it the deployment is left to
    /// orphan recovery.
    pub monitor_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Result of an ensure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub deployment_name: String,
    /// False when an existing deployment was reused.
    pub created: bool,
}

/// Terminal result of readiness monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentHealth {
    Ready,
    /// `Progressing=False` observed.
    Failed(String),
    /// Monitor timed out; deployment persists for orphan recovery.
    Unknown,
}

/// Creates, scales and deletes per-thread worker deployments.
pub struct Reconciler<A: ClusterApi, C: Clock> {
    api: A,
    clock: C,
    config: ReconcilerConfig,
    manifest: ManifestConfig,
}

impl<A: ClusterApi, C: Clock> Reconciler<A, C> {
    pub fn new(api: A, clock: C, config: ReconcilerConfig, manifest: ManifestConfig) -> Self {
        Self {
            api,
            clock,
            config,
            manifest,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn manifest_config(&self) -> &ManifestConfig {
        &self.manifest
    }

    /// Ensure exactly one deployment exists for the session key.
    ///
    /// Looks up by label selector first: a live deployment whose raw
    /// annotation matches wins, no matter which process created it. The
    /// create path resolves 409 conflicts by re-reading.
    pub async fn ensure_worker_deployment(
        &self,
        spec: &WorkerSpec,
    ) -> Result<EnsureOutcome, ClusterError> {
        let name = deployment_name(&spec.session_key);
        let selector = format!("app=worker,session-key={}", spec.session_key.safe());

        let existing = self.api.list_deployments(&selector).await?;
        if let Some(found) = existing
            .iter()
            .find(|d| d.session_key() == Some(spec.session_key.as_str()))
        {
            tracing::debug!(deployment = %found.name, "reusing existing deployment");
            return Ok(EnsureOutcome {
                deployment_name: found.name.clone(),
                created: false,
            });
        }

        let manifest = build_deployment(&self.manifest, spec);
        match self.api.create_deployment(&manifest).await {
            Ok(()) => Ok(EnsureOutcome {
                deployment_name: name,
                created: true,
            }),
            Err(ClusterError::Conflict(_)) => {
                // Lost the race; the winner's deployment is authoritative.
                let winner = self
                    .api
                    .get_deployment(&name)
                    .await?
                    .ok_or_else(|| ClusterError::NotFound(name.clone()))?;
                tracing::debug!(deployment = %winner.name, "create conflict, adopting winner");
                Ok(EnsureOutcome {
                    deployment_name: winner.name,
                    created: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Poll the deployment until it is ready, fails, or the monitor times
    /// out. Call from a spawned task; creation has already returned.
    pub async fn monitor(&self, name: &str) -> DeploymentHealth {
        let deadline = self.clock.now() + self.config.monitor_timeout;
        loop {
            match self.api.get_deployment(name).await {
                Ok(Some(view)) => {
                    if view.ready_replicas > 0 {
                        tracing::info!(deployment = %name, "deployment ready");
                        return DeploymentHealth::Ready;
                    }
                    if view.progressing_false {
                        tracing::warn!(deployment = %name, "deployment failed to progress");
                        return DeploymentHealth::Failed("Progressing=False".to_string());
                    }
                }
                Ok(None) => {
                    return DeploymentHealth::Failed("deployment disappeared".to_string());
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(deployment = %name, error = %e, "monitor poll failed");
                }
                Err(e) => {
                    return DeploymentHealth::Failed(e.to_string());
                }
            }

            if self.clock.now() >= deadline {
                tracing::warn!(deployment = %name, "monitor timed out");
                return DeploymentHealth::Unknown;
            }
            tokio::time::sleep(self.config.monitor_interval).await;
        }
    }

    /// Patch `spec.replicas`. No-op when already at the target.
    pub async fn scale(&self, name: &str, replicas: i32) -> Result<(), ClusterError> {
        match self.api.get_deployment(name).await? {
            Some(view) if view.replicas == replicas => Ok(()),
            Some(_) => self.api.scale_deployment(name, replicas).await,
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        self.api.delete_deployment(name).await
    }

    /// Existing view for a session key, if any.
    pub async fn find_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<DeploymentView>, ClusterError> {
        let selector = format!("app=worker,session-key={}", key.safe());
        let found = self.api.list_deployments(&selector).await?;
        Ok(found
            .into_iter()
            .find(|d| d.session_key() == Some(key.as_str())))
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
