// SPDX-License-Identifier: MIT

//! Job envelope, states, and send/work options.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a job within its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Created,
    /// Claimed by a worker.
    Active,
    /// Handler succeeded.
    Completed,
    /// Handler failed and retries are exhausted (or the job was cancelled).
    Failed,
    /// Handler failed; scheduled for redelivery after the retry delay.
    Retry,
}

peerbot_core::simple_display! {
    JobState {
        Created => "created",
        Active => "active",
        Completed => "completed",
        Failed => "failed",
        Retry => "retry",
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A job as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub name: String,
    pub data: serde_json::Value,
    pub state: JobState,
    pub retry_count: u32,
    pub retry_limit: u32,
    pub priority: i32,
    pub singleton_key: Option<String>,
    pub created_at_ms: u64,
    /// Earliest delivery time (used for retry backoff).
    pub start_after_ms: u64,
}

/// Options for [`crate::Queue::send`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub priority: i32,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub expire_in_hours: u32,
    /// Deduplication token; a second send with the same key inside the
    /// expiry window is silently dropped.
    pub singleton_key: Option<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            retry_limit: 3,
            retry_delay: Duration::from_secs(30),
            expire_in_hours: 22,
            singleton_key: None,
        }
    }
}

impl SendOptions {
    /// Thread-queue policy: same retry posture, higher priority than ingress.
    pub fn thread_message() -> Self {
        Self {
            priority: 10,
            ..Self::default()
        }
    }

    pub fn with_singleton_key(mut self, key: impl Into<String>) -> Self {
        self.singleton_key = Some(key.into());
        self
    }
}

/// Options for [`crate::Queue::work`].
#[derive(Debug, Clone)]
pub struct WorkOptions {
    /// Jobs fetched per poll.
    pub team_size: u32,
    /// Maximum concurrent handler invocations for this subscription.
    pub team_concurrency: u32,
    /// Poll interval when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkOptions {
    fn default() -> Self {
        Self {
            team_size: 2,
            team_concurrency: 2,
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl WorkOptions {
    /// The worker contract: one message at a time.
    pub fn serial() -> Self {
        Self {
            team_size: 1,
            team_concurrency: 1,
            ..Self::default()
        }
    }
}

/// Counts returned by [`crate::Queue::get_queue_size`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSize {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Handler outcome for a delivered job.
///
/// `Retry` re-raises through the queue's retry policy; `Fail` is terminal
/// regardless of remaining retries (malformed payloads must not loop).
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("retryable: {0}")]
    Retry(String),
    #[error("permanent: {0}")]
    Fail(String),
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
