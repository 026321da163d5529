// SPDX-License-Identifier: MIT

//! Idle scaling: park quiet threads at zero replicas.
//!
//! Activity is tracked two ways: the orchestrator records it in memory
//! when it routes a message, and workers patch a `last-activity`
//! annotation after each served message. The sweep takes whichever is
//! fresher, so a restarted daemon does not scale down a thread that was
//! busy a minute ago.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use peerbot_core::Clock;

use crate::api::{ClusterApi, ClusterError, SELECTOR_WORKERS};

/// Annotation workers patch after each served message (epoch ms).
pub const LAST_ACTIVITY_ANNOTATION: &str = "last-activity";

/// Scales deployments to zero after an idle window.
pub struct IdleScaler<A: ClusterApi, C: Clock> {
    api: A,
    clock: C,
    idle_after: Duration,
    last_activity: Mutex<HashMap<String, u64>>,
}

impl<A: ClusterApi, C: Clock> IdleScaler<A, C> {
    pub fn new(api: A, clock: C, idle_after: Duration) -> Self {
        Self {
            api,
            clock,
            idle_after,
            last_activity: Mutex::new(HashMap::new()),
        }
    }

    /// Record that a message was routed to `deployment_name` just now.
    pub fn record_activity(&self, deployment_name: &str) {
        self.last_activity
            .lock()
            .insert(deployment_name.to_string(), self.clock.epoch_ms());
    }

    /// Forget a deployment (after deletion).
    pub fn forget(&self, deployment_name: &str) {
        self.last_activity.lock().remove(deployment_name);
    }

    /// One sweep: scale running-but-idle deployments to zero.
    /// Returns the names scaled down.
    pub async fn run_once(&self) -> Result<Vec<String>, ClusterError> {
        let views = self.api.list_deployments(SELECTOR_WORKERS).await?;
        let now_ms = self.clock.epoch_ms();
        let idle_ms = self.idle_after.as_millis() as u64;
        let mut scaled = Vec::new();

        for view in views {
            if view.replicas == 0 {
                continue;
            }

            let annotated = view
                .annotations
                .get(LAST_ACTIVITY_ANNOTATION)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(view.created_at_ms);
            let tracked = self
                .last_activity
                .lock()
                .get(&view.name)
                .copied()
                .unwrap_or(0);
            let last_active = annotated.max(tracked);

            if now_ms.saturating_sub(last_active) >= idle_ms {
                tracing::info!(deployment = %view.name, "idle, scaling to zero");
                match self.api.scale_deployment(&view.name, 0).await {
                    Ok(()) => scaled.push(view.name),
                    // Deleted out from under us; nothing to do.
                    Err(ClusterError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(scaled)
    }
}

#[cfg(test)]
#[path = "idle_tests.rs"]
mod tests;
