// SPDX-License-Identifier: MIT

//! Deployment spec construction for worker pods.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, HTTPGetAction,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use peerbot_core::{safe_name, SessionKey};

/// Cluster-level configuration for worker deployments.
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    pub namespace: String,
    pub image: String,
    pub service_account: String,
    /// Secret holding the hosting and agent tokens shared by all workers.
    pub bot_secret_name: String,
    pub health_port: i32,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub exit_on_idle_minutes: u32,
    pub workspace_path: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "peerbot-worker:latest".to_string(),
            service_account: "worker".to_string(),
            bot_secret_name: "peerbot-bot-secret".to_string(),
            health_port: 8080,
            cpu_request: "250m".to_string(),
            cpu_limit: "1".to_string(),
            memory_request: "512Mi".to_string(),
            memory_limit: "2Gi".to_string(),
            exit_on_idle_minutes: 10,
            workspace_path: "/workspace".to_string(),
        }
    }
}

/// Per-thread parameters for one worker deployment.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub deployment_name: String,
    pub session_key: SessionKey,
    pub user_id: String,
    pub username: String,
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub repository_url: String,
    /// Per-user secret carrying DATABASE_URL.
    pub user_secret_name: String,
    /// ISO8601 creation stamp for the annotation.
    pub created_at: String,
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        period_seconds: Some(period_seconds),
        ..Default::default()
    }
}

/// Labels identifying one worker deployment.
///
/// `session-key` carries the cluster-safe form; the raw key lives in the
/// annotation because label values cannot hold arbitrary characters.
pub fn worker_labels(spec: &WorkerSpec) -> BTreeMap<String, String> {
    [
        ("app".to_string(), "worker".to_string()),
        ("component".to_string(), "worker".to_string()),
        ("managed-by".to_string(), "orchestrator".to_string()),
        ("session-key".to_string(), spec.session_key.safe()),
        ("user-id".to_string(), safe_name(&spec.user_id)),
    ]
    .into_iter()
    .collect()
}

/// Build the Deployment manifest for a worker.
pub fn build_deployment(config: &ManifestConfig, spec: &WorkerSpec) -> Deployment {
    let labels = worker_labels(spec);
    let annotations: BTreeMap<String, String> = [
        ("session-key".to_string(), spec.session_key.to_string()),
        ("created-at".to_string(), spec.created_at.clone()),
    ]
    .into_iter()
    .collect();

    let mut env = vec![
        env_var("SESSION_KEY", spec.session_key.as_str()),
        env_var("USER_ID", &spec.user_id),
        env_var("USERNAME", &spec.username),
        env_var("CHANNEL_ID", &spec.channel_id),
        env_var("DEPLOYMENT_NAME", &spec.deployment_name),
        env_var("REPOSITORY_URL", &spec.repository_url),
        env_var(
            "EXIT_ON_IDLE_MINUTES",
            &config.exit_on_idle_minutes.to_string(),
        ),
        env_var("WORKSPACE_PATH", &config.workspace_path),
        env_from_secret("DATABASE_URL", &spec.user_secret_name, "DATABASE_URL"),
        env_from_secret("HOSTING_TOKEN", &config.bot_secret_name, "HOSTING_TOKEN"),
        env_from_secret("AGENT_TOKEN", &config.bot_secret_name, "AGENT_TOKEN"),
        env_from_secret("SLACK_BOT_TOKEN", &config.bot_secret_name, "SLACK_BOT_TOKEN"),
    ];
    if let Some(ref thread_ts) = spec.thread_ts {
        env.push(env_var("THREAD_TS", thread_ts));
    }

    let resources = ResourceRequirements {
        requests: Some(
            [
                ("cpu".to_string(), Quantity(config.cpu_request.clone())),
                ("memory".to_string(), Quantity(config.memory_request.clone())),
            ]
            .into_iter()
            .collect(),
        ),
        limits: Some(
            [
                ("cpu".to_string(), Quantity(config.cpu_limit.clone())),
                ("memory".to_string(), Quantity(config.memory_limit.clone())),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    };

    let container = Container {
        name: "worker".to_string(),
        image: Some(config.image.clone()),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: config.health_port,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: "workspace".to_string(),
            mount_path: config.workspace_path.clone(),
            ..Default::default()
        }]),
        liveness_probe: Some(http_probe("/health", config.health_port, 30)),
        readiness_probe: Some(http_probe("/ready", config.health_port, 5)),
        resources: Some(resources),
        ..Default::default()
    };

    // Selector must only carry the distinguishing labels; the shared ones
    // would match every worker.
    let selector_labels: BTreeMap<String, String> = [
        ("app".to_string(), "worker".to_string()),
        ("session-key".to_string(), spec.session_key.safe()),
    ]
    .into_iter()
    .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.deployment_name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.service_account.clone()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "workspace".to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
