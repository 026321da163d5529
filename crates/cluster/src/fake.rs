// SPDX-License-Identifier: MIT

//! In-memory cluster for tests.
//!
//! Tracks deployments as [`DeploymentView`]s and secrets as plain maps.
//! Tests drive status transitions (`set_ready`, `set_progressing_false`)
//! and can inject create conflicts to exercise the race path.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use peerbot_core::{Clock, FakeClock};

use crate::api::{ClusterApi, ClusterError, DeploymentView};

#[derive(Default)]
struct FakeState {
    deployments: Vec<DeploymentView>,
    secrets: BTreeMap<String, BTreeMap<String, String>>,
    scale_calls: Vec<(String, i32)>,
    delete_calls: Vec<String>,
}

/// Fake cluster with scripted failures.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
    clock: FakeClock,
    conflict_on_create: Arc<AtomicU32>,
    transport_failures: Arc<AtomicU32>,
    secret_write_failures: Arc<AtomicU32>,
    auto_ready: Arc<std::sync::atomic::AtomicBool>,
}

impl FakeCluster {
    pub fn new(clock: FakeClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            clock,
            conflict_on_create: Arc::new(AtomicU32::new(0)),
            transport_failures: Arc::new(AtomicU32::new(0)),
            secret_write_failures: Arc::new(AtomicU32::new(0)),
            auto_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Make scale-ups report ready immediately (healthy-cluster mode).
    pub fn set_auto_ready(&self, enabled: bool) {
        self.auto_ready.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `n` creates return 409 (the deployment is still
    /// recorded, as if another caller won the race).
    pub fn conflict_next_creates(&self, n: u32) {
        self.conflict_on_create.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` API calls fail with a transport error.
    pub fn fail_next_calls(&self, n: u32) {
        self.transport_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` secret writes fail with a transport error.
    pub fn fail_next_secret_writes(&self, n: u32) {
        self.secret_write_failures.store(n, Ordering::SeqCst);
    }

    fn check_transport(&self) -> Result<(), ClusterError> {
        if self.transport_failures.load(Ordering::SeqCst) > 0 {
            self.transport_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ClusterError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    /// Mark a deployment's observed ready replica count.
    pub fn set_ready(&self, name: &str, ready: i32) {
        let mut state = self.state.lock();
        if let Some(d) = state.deployments.iter_mut().find(|d| d.name == name) {
            d.ready_replicas = ready;
        }
    }

    pub fn set_progressing_false(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(d) = state.deployments.iter_mut().find(|d| d.name == name) {
            d.progressing_false = true;
        }
    }

    /// Backdate a deployment's creation time by `minutes`.
    pub fn age_deployment(&self, name: &str, minutes: u64) {
        let mut state = self.state.lock();
        if let Some(d) = state.deployments.iter_mut().find(|d| d.name == name) {
            d.created_at_ms = d.created_at_ms.saturating_sub(minutes * 60_000);
        }
    }

    pub fn deployment_names(&self) -> Vec<String> {
        self.state
            .lock()
            .deployments
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn scale_calls(&self) -> Vec<(String, i32)> {
        self.state.lock().scale_calls.clone()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.state.lock().delete_calls.clone()
    }

    pub fn secret(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().secrets.get(name).cloned()
    }

    fn matches_selector(view: &DeploymentView, selector: &str) -> bool {
        selector.split(',').all(|pair| {
            match pair.split_once('=') {
                Some((k, v)) => view.labels.get(k).map(String::as_str) == Some(v),
                None => false,
            }
        })
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_deployment(&self, name: &str) -> Result<Option<DeploymentView>, ClusterError> {
        self.check_transport()?;
        Ok(self
            .state
            .lock()
            .deployments
            .iter()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn list_deployments(&self, selector: &str) -> Result<Vec<DeploymentView>, ClusterError> {
        self.check_transport()?;
        Ok(self
            .state
            .lock()
            .deployments
            .iter()
            .filter(|d| Self::matches_selector(d, selector))
            .cloned()
            .collect())
    }

    async fn create_deployment(&self, manifest: &Deployment) -> Result<(), ClusterError> {
        self.check_transport()?;
        let name = manifest.metadata.name.clone().unwrap_or_default();
        let view = DeploymentView {
            name: name.clone(),
            labels: manifest.metadata.labels.clone().unwrap_or_default(),
            annotations: manifest.metadata.annotations.clone().unwrap_or_default(),
            replicas: manifest.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: 0,
            progressing_false: false,
            created_at_ms: self.clock.epoch_ms(),
        };

        let mut state = self.state.lock();
        let exists = state.deployments.iter().any(|d| d.name == name);

        if self.conflict_on_create.load(Ordering::SeqCst) > 0 {
            self.conflict_on_create.fetch_sub(1, Ordering::SeqCst);
            if !exists {
                state.deployments.push(view);
            }
            return Err(ClusterError::Conflict(name));
        }

        if exists {
            return Err(ClusterError::Conflict(name));
        }
        state.deployments.push(view);
        Ok(())
    }

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ClusterError> {
        self.check_transport()?;
        let mut state = self.state.lock();
        state.scale_calls.push((name.to_string(), replicas));
        match state.deployments.iter_mut().find(|d| d.name == name) {
            Some(d) => {
                d.replicas = replicas;
                if replicas == 0 {
                    d.ready_replicas = 0;
                } else if self.auto_ready.load(Ordering::SeqCst) {
                    d.ready_replicas = replicas;
                }
                Ok(())
            }
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), ClusterError> {
        self.check_transport()?;
        let mut state = self.state.lock();
        state.delete_calls.push(name.to_string());
        state.deployments.retain(|d| d.name != name);
        Ok(())
    }

    async fn annotate_deployment(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError> {
        self.check_transport()?;
        let mut state = self.state.lock();
        match state.deployments.iter_mut().find(|d| d.name == name) {
            Some(d) => {
                d.annotations.insert(key.to_string(), value.to_string());
                Ok(())
            }
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn get_secret(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        self.check_transport()?;
        Ok(self.state.lock().secrets.get(name).cloned())
    }

    async fn apply_secret_keys(
        &self,
        name: &str,
        entries: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.check_transport()?;
        if self.secret_write_failures.load(Ordering::SeqCst) > 0 {
            self.secret_write_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ClusterError::Transport("injected secret write failure".to_string()));
        }
        let mut state = self.state.lock();
        state
            .secrets
            .entry(name.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn delete_secret_keys(&self, name: &str, keys: &[String]) -> Result<(), ClusterError> {
        self.check_transport()?;
        let mut state = self.state.lock();
        if let Some(secret) = state.secrets.get_mut(name) {
            for key in keys {
                secret.remove(key);
            }
        }
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), ClusterError> {
        self.check_transport()?;
        self.state.lock().secrets.remove(name);
        Ok(())
    }
}
