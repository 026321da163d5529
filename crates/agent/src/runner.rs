// SPDX-License-Identifier: MIT

//! Agent runner boundary.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use peerbot_core::AgentOptions;

use crate::event::AgentEvent;

/// Agent invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to spawn agent: {0}")]
    Spawn(String),

    #[error("agent exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("agent timed out after {minutes} minutes")]
    Timeout { minutes: u32 },

    #[error("agent run cancelled")]
    Cancelled,

    #[error("agent reported failure: {0}")]
    Reported(String),
}

/// A prior conversation turn passed to the agent as context.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextTurn {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub cwd: PathBuf,
    pub options: AgentOptions,
    /// Prior thread turns, oldest first.
    pub context: Vec<ContextTurn>,
}

/// Terminal result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Session id for resumption (newly assigned or echoed back).
    pub session_id: Option<String>,
    /// The agent's final text, for the completion chat update.
    pub final_text: String,
}

/// Spawns the agent and streams its events.
///
/// Every event (including terminal ones) is forwarded on `events` before
/// the call returns. Cancelling `cancel` kills the subprocess.
#[async_trait]
pub trait AgentRunner: Send + Sync + 'static {
    async fn run(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError>;
}
