// SPDX-License-Identifier: MIT

//! Kubernetes implementation of the cluster boundary via `kube-rs`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::Client;
use std::collections::BTreeMap;

use crate::api::{ClusterApi, ClusterError, DeploymentView};

/// Cluster API over a real Kubernetes cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub async fn connect(namespace: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Transport(format!("failed to create kube client: {e}")))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn map_err(name: &str, e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(resp) => match resp.code {
            404 => ClusterError::NotFound(name.to_string()),
            409 => ClusterError::Conflict(name.to_string()),
            code if (400..500).contains(&code) => ClusterError::Api {
                code,
                message: resp.message,
            },
            _ => ClusterError::Transport(resp.message),
        },
        other => ClusterError::Transport(other.to_string()),
    }
}

fn view_from(dep: &Deployment) -> DeploymentView {
    let status = dep.status.as_ref();
    let progressing_false = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Progressing" && c.status == "False")
        })
        .unwrap_or(false);

    let created_at_ms = dep
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0.timestamp_millis().max(0) as u64)
        .unwrap_or(0);

    DeploymentView {
        name: dep.metadata.name.clone().unwrap_or_default(),
        labels: dep.metadata.labels.clone().unwrap_or_default(),
        annotations: dep.metadata.annotations.clone().unwrap_or_default(),
        replicas: dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        progressing_false,
        created_at_ms,
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_deployment(&self, name: &str) -> Result<Option<DeploymentView>, ClusterError> {
        match self.deployments().get(name).await {
            Ok(dep) => Ok(Some(view_from(&dep))),
            Err(e) => match map_err(name, e) {
                ClusterError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn list_deployments(&self, selector: &str) -> Result<Vec<DeploymentView>, ClusterError> {
        let lp = ListParams::default().labels(selector);
        let list = self
            .deployments()
            .list(&lp)
            .await
            .map_err(|e| map_err(selector, e))?;
        Ok(list.items.iter().map(view_from).collect())
    }

    async fn create_deployment(&self, manifest: &Deployment) -> Result<(), ClusterError> {
        let name = manifest.metadata.name.clone().unwrap_or_default();
        self.deployments()
            .create(&PostParams::default(), manifest)
            .await
            .map_err(|e| map_err(&name, e))?;
        tracing::info!(deployment = %name, "created worker deployment");
        Ok(())
    }

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ClusterError> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.deployments()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(name, e))?;
        tracing::info!(deployment = %name, replicas, "scaled deployment");
        Ok(())
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), ClusterError> {
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.deployments().delete(name, &dp).await {
            Ok(_) => {
                tracing::info!(deployment = %name, "deleted deployment");
                Ok(())
            }
            Err(e) => match map_err(name, e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn annotate_deployment(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError> {
        let patch = serde_json::json!({
            "metadata": { "annotations": { key: value } }
        });
        self.deployments()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(name, e))?;
        Ok(())
    }

    async fn get_secret(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        match self.secrets().get(name).await {
            Ok(secret) => {
                let decoded = secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
                    .collect();
                Ok(Some(decoded))
            }
            Err(e) => match map_err(name, e) {
                ClusterError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn apply_secret_keys(
        &self,
        name: &str,
        entries: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        if self.get_secret(name).await?.is_none() {
            let secret = Secret {
                metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                string_data: Some(entries),
                ..Default::default()
            };
            match self.secrets().create(&PostParams::default(), &secret).await {
                Ok(_) => return Ok(()),
                // Lost a create race; fall through to the merge patch.
                Err(kube::Error::Api(resp)) if resp.code == 409 => {}
                Err(e) => return Err(map_err(name, e)),
            }
            let entries = secret.string_data.unwrap_or_default();
            let patch = serde_json::json!({ "stringData": entries });
            self.secrets()
                .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| map_err(name, e))?;
            return Ok(());
        }

        let patch = serde_json::json!({ "stringData": entries });
        self.secrets()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(name, e))?;
        Ok(())
    }

    async fn delete_secret_keys(&self, name: &str, keys: &[String]) -> Result<(), ClusterError> {
        let nulls: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .map(|k| (k.clone(), serde_json::Value::Null))
            .collect();
        let patch = serde_json::json!({ "data": nulls });
        match self
            .secrets()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match map_err(name, e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn delete_secret(&self, name: &str) -> Result<(), ClusterError> {
        match self.secrets().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match map_err(name, e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}
