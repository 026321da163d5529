// SPDX-License-Identifier: MIT

//! Typed chat-platform client.

use async_trait::async_trait;

/// Chat API errors, split along the retry boundary: the named permanent
/// errors are logged and dropped, everything else re-raises for queue
/// retry.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message not found")]
    MessageNotFound,

    #[error("channel not found")]
    ChannelNotFound,

    #[error("bot not in channel")]
    NotInChannel,

    /// 429 with a retry hint.
    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// Any other API-level error string from the platform.
    #[error("chat api error: {0}")]
    Api(String),

    /// Transport-level failure.
    #[error("chat transport error: {0}")]
    Transport(String),
}

impl ChatError {
    /// Permanent errors: the specific operation is dropped, the job
    /// continues.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ChatError::MessageNotFound | ChatError::ChannelNotFound | ChatError::NotInChannel
        )
    }
}

/// A posted message's coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

/// One prior turn fetched for agent context.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ThreadTurn {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

/// The platform boundary: everything the system does to chat.
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    /// Post a message; `thread_ts` threads the reply.
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage, ChatError>;

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), ChatError>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChatError>;

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str)
        -> Result<(), ChatError>;

    /// All messages in a thread, oldest first.
    async fn fetch_thread_messages(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadTurn>, ChatError>;
}
