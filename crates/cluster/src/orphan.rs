// SPDX-License-Identifier: MIT

//! Orphan detection and recovery.
//!
//! An orphan is a deployment stuck below its desired ready replicas, or
//! one whose rollout stopped progressing. Recovery is a bounce: scale to
//! zero, wait, scale back up. A deployment that stays broken after its
//! bounce is cleaned up and reported so the owning job can be failed.

use std::collections::HashSet;
use std::time::Duration;

use peerbot_core::Clock;

use crate::api::{ClusterApi, ClusterError, DeploymentView, SELECTOR_WORKERS};

/// Why a deployment was classified as an orphan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Not ready and older than `max_age`.
    StaleNotReady,
    /// `Progressing=False` condition.
    NotProgressing,
    /// Not ready past the grace period while its session is still active.
    ActiveNotReady,
}

peerbot_core::simple_display! {
    RecoveryAction {
        StaleNotReady => "stale-not-ready",
        NotProgressing => "not-progressing",
        ActiveNotReady => "active-not-ready",
    }
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub deployment_name: String,
    pub session_key: Option<String>,
    pub action: RecoveryAction,
    /// True when the bounce did not help and the deployment was deleted.
    /// The originating job must be marked failed by the caller.
    pub cleaned_up: bool,
}

/// Sweeper tuning.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Age past which a not-ready deployment is an orphan regardless of
    /// session state.
    pub max_age: Duration,
    /// Grace period for deployments whose session is tracked active.
    pub active_grace: Duration,
    /// Settle time between scale-down and scale-up during a bounce.
    pub bounce_wait: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60),
            active_grace: Duration::from_secs(5 * 60),
            bounce_wait: Duration::from_secs(5),
        }
    }
}

/// Classify a deployment. Pure; drives both the sweep and its tests.
///
/// Deployments parked at zero desired replicas are idle, not orphaned.
pub fn classify(
    view: &DeploymentView,
    now_ms: u64,
    config: &SweepConfig,
    active_keys: &HashSet<String>,
) -> Option<RecoveryAction> {
    if view.progressing_false {
        return Some(RecoveryAction::NotProgressing);
    }
    if view.replicas == 0 || view.ready_replicas > 0 {
        return None;
    }

    let age = Duration::from_millis(now_ms.saturating_sub(view.created_at_ms));
    if age > config.max_age {
        return Some(RecoveryAction::StaleNotReady);
    }

    let active = view
        .session_key()
        .map(|k| active_keys.contains(k))
        .unwrap_or(false);
    if active && age > config.active_grace {
        return Some(RecoveryAction::ActiveNotReady);
    }

    None
}

/// Periodic orphan recovery over every managed worker deployment.
pub struct OrphanSweeper<A: ClusterApi, C: Clock> {
    api: A,
    clock: C,
    config: SweepConfig,
}

impl<A: ClusterApi, C: Clock> OrphanSweeper<A, C> {
    pub fn new(api: A, clock: C, config: SweepConfig) -> Self {
        Self { api, clock, config }
    }

    /// One sweep: list, classify, bounce, clean up the unrecoverable.
    ///
    /// Repeated sweeps reach a fixed point: every orphan either becomes
    /// ready after its bounce or is deleted.
    pub async fn run_once(
        &self,
        active_keys: &HashSet<String>,
    ) -> Result<Vec<RecoveryReport>, ClusterError> {
        let views = self.api.list_deployments(SELECTOR_WORKERS).await?;
        let now_ms = self.clock.epoch_ms();
        let mut reports = Vec::new();

        for view in &views {
            let Some(action) = classify(view, now_ms, &self.config, active_keys) else {
                continue;
            };
            tracing::warn!(
                deployment = %view.name,
                action = %action,
                age_minutes = view.age_minutes(now_ms),
                "recovering orphaned deployment"
            );
            let cleaned_up = self.recover(&view.name).await?;
            reports.push(RecoveryReport {
                deployment_name: view.name.clone(),
                session_key: view.session_key().map(str::to_string),
                action,
                cleaned_up,
            });
        }

        Ok(reports)
    }

    /// Bounce a deployment; delete it if the bounce does not take.
    /// Returns true when the deployment was cleaned up.
    async fn recover(&self, name: &str) -> Result<bool, ClusterError> {
        self.api.scale_deployment(name, 0).await?;
        tokio::time::sleep(self.config.bounce_wait).await;
        self.api.scale_deployment(name, 1).await?;
        tokio::time::sleep(self.config.bounce_wait).await;

        match self.api.get_deployment(name).await? {
            Some(view) if view.ready_replicas > 0 && !view.progressing_false => Ok(false),
            Some(_) => {
                tracing::warn!(deployment = %name, "bounce failed, cleaning up");
                self.api.delete_deployment(name).await?;
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
#[path = "orphan_tests.rs"]
mod tests;
