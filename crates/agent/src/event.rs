// SPDX-License-Identifier: MIT

//! Agent event stream schema.

use serde::{Deserialize, Serialize};

/// Status of one task-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// One entry in a structured task list the agent may stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub title: String,
    pub status: TaskStatus,
}

/// One event from the agent's NDJSON stdout stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First event of a run; carries the agent-assigned session id.
    Started { session_id: String },
    /// Incremental output.
    Output {
        text: String,
        /// When present, replaces the streamed text in chat.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_list: Option<Vec<TaskItem>>,
    },
    /// Terminal success.
    Result {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Terminal failure reported in-stream.
    Error { message: String },
}

impl AgentEvent {
    /// Parse one NDJSON line. Unknown event types and malformed lines are
    /// skipped by returning `None` — the agent's stream format may grow.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable agent event line");
                None
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Result { .. } | AgentEvent::Error { .. })
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
