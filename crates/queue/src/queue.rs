// SPDX-License-Identifier: MIT

//! The queue contract.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::{JobError, JobId, QueueJob, QueueSize, SendOptions, WorkOptions};

/// Queue layer errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Backend unreachable or query failed; callers may retry.
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Backend failures are transient; the rest are caller bugs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Backend(_))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Backend(e.to_string())
    }
}

/// A subscribed job handler.
///
/// Handlers must be idempotent: the queue delivers at least once, and a
/// crash between handling and acknowledgement redelivers the job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: QueueJob) -> Result<(), JobError>;
}

/// Running subscription returned by [`Queue::work`].
///
/// Dropping the handle does not stop the subscription; call [`stop`] to
/// cancel the poll loop and wait for in-flight handlers to finish.
///
/// [`stop`]: WorkHandle::stop
pub struct WorkHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkHandle {
    pub fn new(token: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { token, tasks }
    }

    /// Cancellation token shared with the poll loop.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop polling and drain in-flight handlers.
    pub async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Named durable FIFO queues with singleton dedup, retry and priority.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Create a queue. Idempotent.
    async fn create_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Delete a queue and all of its jobs.
    async fn delete_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Names of every queue that exists.
    async fn list_queues(&self) -> Result<Vec<String>, QueueError>;

    /// Enqueue a payload. Returns `None` when a singleton key deduplicated
    /// the send.
    async fn send(
        &self,
        name: &str,
        payload: serde_json::Value,
        opts: SendOptions,
    ) -> Result<Option<JobId>, QueueError>;

    /// Subscribe a handler to a queue.
    async fn work(
        &self,
        name: &str,
        opts: WorkOptions,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkHandle, QueueError>;

    /// Cancel a waiting or active job (marks it failed).
    async fn cancel(&self, id: JobId) -> Result<(), QueueError>;

    async fn get_job_by_id(&self, id: JobId) -> Result<Option<QueueJob>, QueueError>;

    async fn get_queue_size(&self, name: &str) -> Result<QueueSize, QueueError>;
}
