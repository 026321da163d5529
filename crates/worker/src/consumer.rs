// SPDX-License-Identifier: MIT

//! The worker lifecycle contract.
//!
//! One message at a time: claim, set up the workspace, run the agent,
//! stream output to the response queue, commit and push, converge the
//! reaction. The single-message mutex turns overlapping deliveries into
//! retryable errors so the queue redelivers instead of interleaving.
//!
//! The worker's only voluntary exit is the idle timer; SIGTERM drains
//! gracefully. Either way the process leaves the cluster tidy: idle exit
//! deletes its own deployment (best effort — the reconciler garbage
//! collects if this fails).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use peerbot_agent::{AgentEvent, AgentRequest, AgentRunner, ContextTurn, TaskItem, TaskStatus};
use peerbot_chat::egress::THREAD_RESPONSE_QUEUE;
use peerbot_chat::ChatClient;
use peerbot_cluster::{ClusterApi, LAST_ACTIVITY_ANNOTATION};
use peerbot_core::{Clock, ThreadResponse, WorkerDeploymentRequest};
use peerbot_queue::{JobError, JobHandler, Queue, QueueJob, SendOptions, WorkOptions};
use peerbot_store::{ConversationRecord, ConversationStore};

use crate::config::WorkerConfig;
use crate::workspace::{checkpoint_message, Workspace};

/// Auto-push cadence while the agent runs.
const AUTO_PUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Why the worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// No message for the idle window; deployment deleted.
    Idle,
    /// SIGTERM/SIGINT drained.
    Terminated,
}

/// Per-thread queue consumer.
pub struct WorkerConsumer<C: Clock> {
    config: WorkerConfig,
    queue: Arc<dyn Queue>,
    chat: Arc<dyn ChatClient>,
    conversations: Arc<dyn ConversationStore>,
    cluster: Arc<dyn ClusterApi>,
    agent: Arc<dyn AgentRunner>,
    workspace: Arc<dyn Workspace>,
    clock: C,
    /// Single-message mutex (invariant: one message per session at a time).
    busy: tokio::sync::Mutex<()>,
    last_activity_ms: Mutex<u64>,
    shutdown: CancellationToken,
    /// Idle poll cadence; shortened in tests.
    idle_check_interval: Duration,
}

impl<C: Clock> WorkerConsumer<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn Queue>,
        chat: Arc<dyn ChatClient>,
        conversations: Arc<dyn ConversationStore>,
        cluster: Arc<dyn ClusterApi>,
        agent: Arc<dyn AgentRunner>,
        workspace: Arc<dyn Workspace>,
        clock: C,
    ) -> Self {
        let now_ms = clock.epoch_ms();
        Self {
            config,
            queue,
            chat,
            conversations,
            cluster,
            agent,
            workspace,
            clock,
            busy: tokio::sync::Mutex::new(()),
            last_activity_ms: Mutex::new(now_ms),
            shutdown: CancellationToken::new(),
            idle_check_interval: Duration::from_secs(10),
        }
    }

    pub fn with_idle_check_interval(mut self, interval: Duration) -> Self {
        self.idle_check_interval = interval;
        self
    }

    /// Token cancelled by SIGTERM handling in `main`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn record_activity(&self) {
        *self.last_activity_ms.lock() = self.clock.epoch_ms();
    }

    fn idle_for(&self) -> Duration {
        let last = *self.last_activity_ms.lock();
        Duration::from_millis(self.clock.epoch_ms().saturating_sub(last))
    }

    /// Subscribe and serve until idle exit or termination.
    pub async fn run(self: Arc<Self>) -> Result<WorkerExit, peerbot_queue::QueueError> {
        let handle = self
            .queue
            .work(
                &self.config.thread_queue(),
                WorkOptions::serial(),
                self.clone(),
            )
            .await?;
        tracing::info!(
            queue = %self.config.thread_queue(),
            idle_minutes = self.config.exit_on_idle.as_secs() / 60,
            "worker serving"
        );

        let exit = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break WorkerExit::Terminated,
                _ = tokio::time::sleep(self.idle_check_interval) => {
                    // Never idle out mid-message
                    if self.busy.try_lock().is_ok() && self.idle_for() >= self.config.exit_on_idle {
                        break WorkerExit::Idle;
                    }
                }
            }
        };

        handle.stop().await;

        if exit == WorkerExit::Idle {
            tracing::info!(deployment = %self.config.deployment_name, "idle, deleting own deployment");
            if let Err(e) = self
                .cluster
                .delete_deployment(&self.config.deployment_name)
                .await
            {
                tracing::warn!(error = %e, "self-deletion failed, reconciler will collect");
            }
        }
        Ok(exit)
    }

    fn envelope(
        &self,
        request: &WorkerDeploymentRequest,
        content: Option<String>,
        is_done: bool,
        error: Option<String>,
    ) -> ThreadResponse {
        ThreadResponse {
            message_id: request.platform_metadata.slack_response_ts.clone(),
            channel_id: request.platform_metadata.slack_response_channel.clone(),
            thread_ts: request.thread_id.clone(),
            user_id: request.user_id.clone(),
            content,
            is_done,
            reaction: None,
            error,
            timestamp: self.clock.epoch_ms(),
            original_message_ts: Some(request.platform_metadata.original_message_ts.clone()),
        }
    }

    async fn send_response(&self, response: &ThreadResponse) {
        let payload = match serde_json::to_value(response) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "response serialization failed");
                return;
            }
        };
        if let Err(e) = self
            .queue
            .send(THREAD_RESPONSE_QUEUE, payload, SendOptions::default())
            .await
        {
            tracing::warn!(error = %e, "response send failed");
        }
    }

    /// Spawn the 30s checkpoint ticker. Cancelled when the agent finishes.
    fn start_auto_push(&self, branch: String) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let workspace = self.workspace.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(AUTO_PUSH_INTERVAL) => {}
                }
                match workspace.changed_files().await {
                    Ok(0) => {}
                    Ok(changed) => {
                        if let Err(e) = workspace
                            .commit_and_push(&branch, &checkpoint_message(changed))
                            .await
                        {
                            tracing::warn!(error = %e, "auto-push failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "status check failed"),
                }
            }
        });
        token
    }

    /// Prior thread turns for agent context; system noise is already
    /// filtered at the chat boundary.
    async fn fetch_context(&self, request: &WorkerDeploymentRequest) -> Vec<ContextTurn> {
        match self
            .chat
            .fetch_thread_messages(&request.channel_id, &request.thread_id)
            .await
        {
            Ok(turns) => turns
                .into_iter()
                .filter(|t| !t.content.trim().is_empty())
                .map(|t| ContextTurn {
                    role: t.role,
                    content: t.content,
                    timestamp: t.timestamp,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "context fetch failed, running without history");
                Vec::new()
            }
        }
    }

    async fn persist_agent_session(&self, request: &WorkerDeploymentRequest, session_id: &str) {
        let session_key = request.session_key();
        let tenant_id = &request.platform_metadata.team_id;
        let result = match self.conversations.get(&session_key, tenant_id).await {
            Ok(Some(_)) => {
                self.conversations
                    .set_agent_session(&session_key, tenant_id, session_id)
                    .await
            }
            Ok(None) => {
                let mut record =
                    ConversationRecord::new(session_key.clone(), tenant_id.clone(), request.user_id.clone());
                record.agent_session_id = Some(session_id.to_string());
                record.bot_id = Some(request.bot_id.clone());
                self.conversations.upsert(&record).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "agent session persistence failed");
        }
    }

    async fn final_push(&self, branch: &str) {
        match self.workspace.changed_files().await {
            Ok(0) => {}
            Ok(changed) => {
                if let Err(e) = self
                    .workspace
                    .commit_and_push(branch, &checkpoint_message(changed))
                    .await
                {
                    tracing::warn!(error = %e, "final push failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "final status check failed"),
        }
    }

    async fn heartbeat(&self) {
        let stamp = self.clock.epoch_ms().to_string();
        if let Err(e) = self
            .cluster
            .annotate_deployment(
                &self.config.deployment_name,
                LAST_ACTIVITY_ANNOTATION,
                &stamp,
            )
            .await
        {
            tracing::debug!(error = %e, "heartbeat annotation failed");
        }
    }

    async fn process_message(
        &self,
        request: &WorkerDeploymentRequest,
    ) -> Result<(), ProcessError> {
        let branch = self.config.branch();

        self.send_response(&self.envelope(
            request,
            Some("Setting up workspace\u{2026}".to_string()),
            false,
            None,
        ))
        .await;

        self.workspace.prepare(&branch).await?;
        let auto_push = self.start_auto_push(branch.clone());

        let context = self.fetch_context(request).await;

        let mut options = request.claude_options.clone();
        if options.resume_session_id.is_none() {
            options.resume_session_id = request
                .routing_metadata
                .as_ref()
                .and_then(|r| r.agent_session_id.clone())
                .or_else(|| request.agent_session_id.clone());
        }

        let agent_request = AgentRequest {
            prompt: request.message_text.clone(),
            cwd: self.workspace.root(),
            options,
            context,
        };

        let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(64);
        let forwarder = {
            let consumer_queue = self.queue.clone();
            let template = self.envelope(request, None, false, None);
            let clock = self.clock.clone();
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    if let AgentEvent::Output { text, task_list } = event {
                        let content = match task_list {
                            Some(tasks) => render_task_list(&tasks),
                            None => text,
                        };
                        let mut response = template.clone();
                        response.content = Some(content);
                        response.timestamp = clock.epoch_ms();
                        if let Ok(payload) = serde_json::to_value(&response) {
                            if let Err(e) = consumer_queue
                                .send(THREAD_RESPONSE_QUEUE, payload, SendOptions::default())
                                .await
                            {
                                tracing::warn!(error = %e, "stream response send failed");
                            }
                        }
                    }
                }
            })
        };

        let outcome = self
            .agent
            .run(agent_request, event_tx, self.shutdown.child_token())
            .await;

        auto_push.cancel();
        let _ = forwarder.await;
        self.final_push(&branch).await;

        match outcome {
            Ok(outcome) => {
                if let Some(session_id) = &outcome.session_id {
                    self.persist_agent_session(request, session_id).await;
                }
                let text = if outcome.final_text.is_empty() {
                    "Done. Changes are pushed to your session branch.".to_string()
                } else {
                    outcome.final_text
                };
                self.send_response(&self.envelope(request, Some(text), true, None))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.send_response(&self.envelope(
                    request,
                    Some(format!("Something went wrong: {e}")),
                    false,
                    Some(e.to_string()),
                ))
                .await;
                Err(e.into())
            }
        }
    }
}

/// Internal processing failure; always retryable through the queue.
#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
    #[error(transparent)]
    Agent(#[from] peerbot_agent::AgentError),
}

/// Render a structured task list in place of streamed text.
fn render_task_list(tasks: &[TaskItem]) -> String {
    let mut out = String::from("*Tasks*");
    for task in tasks {
        out.push('\n');
        out.push_str(match task.status {
            TaskStatus::Pending => "[ ] ",
            TaskStatus::InProgress => "[~] ",
            TaskStatus::Completed => "[x] ",
        });
        out.push_str(&task.title);
    }
    out
}

#[async_trait]
impl<C: Clock> JobHandler for WorkerConsumer<C> {
    async fn handle(&self, job: QueueJob) -> Result<(), JobError> {
        let request: WorkerDeploymentRequest = serde_json::from_value(job.data)
            .map_err(|e| JobError::Fail(format!("malformed thread message: {e}")))?;
        if request.routing_metadata.is_none() {
            return Err(JobError::Fail("thread message without routing".to_string()));
        }

        // One message at a time; concurrent delivery redelivers later
        let Ok(_guard) = self.busy.try_lock() else {
            return Err(JobError::Retry("worker busy".to_string()));
        };
        self.record_activity();

        let result = self.process_message(&request).await;

        self.record_activity();
        self.heartbeat().await;

        result.map_err(|e| JobError::Retry(e.to_string()))
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
