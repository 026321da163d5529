// SPDX-License-Identifier: MIT

//! Thread-session entity and status machine.
//!
//! A [`ThreadSession`] is the dispatcher's in-memory record of one admitted
//! conversation. It is advisory: the authoritative state lives in the queue
//! and the cluster, and a lost record is rebuilt from those on restart.

use serde::{Deserialize, Serialize};

use crate::key::SessionKey;

/// Lifecycle status of a thread session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Admitted, not yet enqueued.
    Pending,
    /// Deployment being created for a new thread.
    Starting,
    /// Worker is processing a message.
    Running,
    /// Message handed to the queue layer.
    Enqueued,
    /// Terminal: worker reported success.
    Completed,
    /// Terminal: worker reported failure.
    Error,
    /// Terminal: job expired before completion.
    Timeout,
}

impl SessionStatus {
    /// Terminal statuses make the record eligible for pruning.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Error | SessionStatus::Timeout
        )
    }
}

crate::simple_display! {
    SessionStatus {
        Pending => "pending",
        Starting => "starting",
        Running => "running",
        Enqueued => "enqueued",
        Completed => "completed",
        Error => "error",
        Timeout => "timeout",
    }
}

/// Dispatcher-side record of one conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSession {
    pub session_key: SessionKey,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub repository_url: String,
    /// Agent conversation id, once the first turn has assigned one.
    pub agent_session_id: Option<String>,
    pub status: SessionStatus,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

impl ThreadSession {
    pub fn new(
        session_key: SessionKey,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        repository_url: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            session_key,
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            repository_url: repository_url.into(),
            agent_session_id: None,
            status: SessionStatus::Pending,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
        }
    }

    /// Advance the status and stamp activity.
    pub fn advance(&mut self, status: SessionStatus, now_ms: u64) {
        self.status = status;
        self.last_activity_ms = now_ms;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
