// SPDX-License-Identifier: MIT

//! Orchestrator consumer: ingress jobs → cluster state → thread queues.
//!
//! Consumes the `messages` queue. Each job either creates a worker
//! deployment for a new thread or wakes the existing one, then forwards
//! the message to the thread's own queue at elevated priority. Failures
//! re-raise for queue retry; the final failed attempt marks the
//! conversation errored so the thread's state is visible.

pub mod cleanup;
pub mod credentials;

use async_trait::async_trait;
use std::sync::Arc;

use peerbot_cluster::{
    ClusterApi, ClusterError, DeploymentHealth, IdleScaler, Reconciler, WorkerSpec,
};
use peerbot_core::{deployment_name, thread_queue_name, Clock, WorkerDeploymentRequest};
use peerbot_queue::{JobError, JobHandler, Queue, QueueError, QueueJob, SendOptions};
use peerbot_store::{ConversationRecord, ConversationStatus, ConversationStore, DbRoles, StoreError};

pub use credentials::{CredentialError, CredentialStore, UserCredentials};

use crate::dispatcher::usernames::normalize_username;

/// Orchestration failures, all re-raised through the queue's retry policy.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The `messages` queue consumer.
pub struct Orchestrator<R: DbRoles, A: ClusterApi, C: Clock> {
    queue: Arc<dyn Queue>,
    reconciler: Arc<Reconciler<A, C>>,
    credentials: Arc<CredentialStore<R, A>>,
    conversations: Arc<dyn ConversationStore>,
    idle: Arc<IdleScaler<A, C>>,
}

impl<R: DbRoles, A: ClusterApi, C: Clock> Orchestrator<R, A, C> {
    pub fn new(
        queue: Arc<dyn Queue>,
        reconciler: Arc<Reconciler<A, C>>,
        credentials: Arc<CredentialStore<R, A>>,
        conversations: Arc<dyn ConversationStore>,
        idle: Arc<IdleScaler<A, C>>,
    ) -> Self {
        Self {
            queue,
            reconciler,
            credentials,
            conversations,
            idle,
        }
    }

    /// Converge cluster state for one request and forward it to the
    /// thread queue. Returns the deployment name.
    pub async fn handle_request(
        &self,
        request: &WorkerDeploymentRequest,
    ) -> Result<String, OrchestrateError> {
        let session_key = request.session_key();
        let name = deployment_name(&session_key);
        let username = normalize_username(&request.platform_metadata.user_display_name);

        // Mark the conversation active up front so orphan recovery sees a
        // tracked session even if we crash mid-flight.
        if self
            .conversations
            .get(&session_key, &request.platform_metadata.team_id)
            .await?
            .is_none()
        {
            let mut record = ConversationRecord::new(
                session_key.clone(),
                request.platform_metadata.team_id.clone(),
                request.user_id.clone(),
            );
            record.bot_id = Some(request.bot_id.clone());
            record.agent_session_id = request.agent_session_id.clone();
            self.conversations.upsert(&record).await?;
        }

        let creds = self
            .credentials
            .ensure_user_credentials(&request.user_id, &username)
            .await?;

        let spec = WorkerSpec {
            deployment_name: name.clone(),
            session_key: session_key.clone(),
            user_id: request.user_id.clone(),
            username,
            channel_id: request.channel_id.clone(),
            thread_ts: Some(request.thread_id.clone()),
            repository_url: request.platform_metadata.repository_url.clone(),
            user_secret_name: creds.secret_name,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let existing_thread = request.routing_metadata.is_some();
        if existing_thread {
            match self.reconciler.scale(&name, 1).await {
                Ok(()) => {}
                Err(ClusterError::NotFound(_)) => {
                    // Orphaned routing state: the deployment idled out and
                    // deleted itself. Recreate.
                    tracing::info!(deployment = %name, "recreating deployment for existing thread");
                    self.create_and_monitor(&spec, &request.platform_metadata.team_id)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            self.create_and_monitor(&spec, &request.platform_metadata.team_id)
                .await?;
        }

        let thread_queue = thread_queue_name(&name);
        self.queue.create_queue(&thread_queue).await?;

        let mut message = request.clone();
        if message.routing_metadata.is_none() {
            message.routing_metadata = Some(peerbot_core::RoutingMetadata {
                target_thread_id: message.thread_id.clone(),
                agent_session_id: message.agent_session_id.clone(),
                user_id: message.user_id.clone(),
            });
        }
        let payload = serde_json::to_value(&message).map_err(QueueError::from)?;
        let singleton_key = format!("{}:{}", session_key, request.message_id);
        self.queue
            .send(
                &thread_queue,
                payload,
                SendOptions::thread_message().with_singleton_key(singleton_key),
            )
            .await?;

        self.idle.record_activity(&name);
        tracing::info!(
            session_key = %session_key,
            deployment = %name,
            queue = %thread_queue,
            "message routed to thread"
        );
        Ok(name)
    }

    async fn create_and_monitor(
        &self,
        spec: &WorkerSpec,
        tenant_id: &str,
    ) -> Result<(), OrchestrateError> {
        let outcome = self.reconciler.ensure_worker_deployment(spec).await?;
        if !outcome.created {
            return Ok(());
        }

        let reconciler = self.reconciler.clone();
        let conversations = self.conversations.clone();
        let session_key = spec.session_key.clone();
        let tenant_id = tenant_id.to_string();
        let name = outcome.deployment_name;
        tokio::spawn(async move {
            match reconciler.monitor(&name).await {
                DeploymentHealth::Ready => {}
                DeploymentHealth::Failed(reason) => {
                    tracing::warn!(deployment = %name, %reason, "worker deployment failed");
                    let _ = conversations
                        .set_status(&session_key, &tenant_id, ConversationStatus::Error)
                        .await;
                }
                DeploymentHealth::Unknown => {
                    // Left for orphan recovery
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl<R: DbRoles, A: ClusterApi, C: Clock> JobHandler for Orchestrator<R, A, C> {
    async fn handle(&self, job: QueueJob) -> Result<(), JobError> {
        let request: WorkerDeploymentRequest = serde_json::from_value(job.data.clone())
            .map_err(|e| JobError::Fail(format!("malformed deployment request: {e}")))?;
        if let Err(e) = request.validate() {
            return Err(JobError::Fail(e.to_string()));
        }

        match self.handle_request(&request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let last_attempt = job.retry_count >= job.retry_limit;
                if last_attempt {
                    let session_key = request.session_key();
                    tracing::warn!(
                        session_key = %session_key,
                        error = %e,
                        "retries exhausted, marking conversation errored"
                    );
                    let _ = self
                        .conversations
                        .set_status(
                            &session_key,
                            &request.platform_metadata.team_id,
                            ConversationStatus::Error,
                        )
                        .await;
                }
                Err(JobError::Retry(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
