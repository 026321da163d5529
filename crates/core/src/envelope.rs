// SPDX-License-Identifier: MIT

//! Queue message envelopes.
//!
//! These are the wire schemas carried through the queue layer: the ingress
//! request produced by the dispatcher, the thread message forwarded by the
//! orchestrator, and the response envelope consumed by the egress. Field
//! names serialize as camelCase so payloads match what every other consumer
//! of the queues expects.

use serde::{Deserialize, Serialize};

use crate::key::SessionKey;

/// Chat-platform coordinates and presentation data for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMetadata {
    pub team_id: String,
    pub user_display_name: String,
    pub repository_url: String,
    /// Channel the placeholder reply was posted to.
    pub slack_response_channel: String,
    /// Timestamp of the placeholder reply (the message workers update).
    pub slack_response_ts: String,
    /// Timestamp of the user's own message (the one reactions land on).
    pub original_message_ts: String,
}

/// Options forwarded verbatim to the agent subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub timeout_minutes: u32,
    /// Agent session to resume, when the thread has prior turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            allowed_tools: Vec::new(),
            model: None,
            timeout_minutes: 30,
            resume_session_id: None,
        }
    }
}

/// Present when the message targets an existing thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetadata {
    pub target_thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    pub user_id: String,
}

/// Ingress payload: one admitted user message, everything the orchestrator
/// and worker need to act on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDeploymentRequest {
    pub user_id: String,
    pub bot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    /// Thread id this message belongs to (the session key's thread part).
    pub thread_id: String,
    pub platform: String,
    pub platform_user_id: String,
    pub message_id: String,
    pub message_text: String,
    pub channel_id: String,
    pub platform_metadata: PlatformMetadata,
    pub claude_options: AgentOptions,
    /// Set when the thread already has a worker deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_metadata: Option<RoutingMetadata>,
}

impl WorkerDeploymentRequest {
    /// The session key this request correlates under.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::derive(
            &self.platform,
            &self.platform_metadata.team_id,
            &self.channel_id,
            &self.user_id,
            Some(&self.thread_id),
            &self.message_id,
        )
    }

    /// Required-field validation at the orchestrator boundary.
    ///
    /// A payload that fails here is permanently malformed; the queue layer
    /// must not retry it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("userId", &self.user_id),
            ("threadId", &self.thread_id),
            ("platform", &self.platform),
            ("messageId", &self.message_id),
            ("channelId", &self.channel_id),
        ] {
            if value.is_empty() {
                return Err(ValidationError::MissingField(field));
            }
        }
        if self.platform_metadata.repository_url.is_empty() {
            return Err(ValidationError::MissingField("repositoryUrl"));
        }
        Ok(())
    }
}

/// Malformed envelope — rejected without retry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Terminal reaction state for the originating user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Working,
    Success,
    Failure,
}

crate::simple_display! {
    ReactionKind {
        Working => "working",
        Success => "success",
        Failure => "failure",
    }
}

/// Egress payload: one streamed update from a worker back to chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    pub message_id: String,
    pub channel_id: String,
    pub thread_ts: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub is_done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<ReactionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_ts: Option<String>,
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
