// SPDX-License-Identifier: MIT

//! Slack Web API implementation of [`ChatClient`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::client::{ChatClient, ChatError, PostedMessage, ThreadTurn};

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// Slack Web API client authenticated with a bot token.
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    messages: Option<Vec<SlackMessage>>,
}

#[derive(Deserialize)]
struct SlackMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, ChatError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        if response.status().as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(ChatError::RateLimited { retry_after_secs });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        if parsed.ok {
            return Ok(parsed);
        }
        Err(map_api_error(parsed.error.as_deref().unwrap_or("unknown")))
    }
}

/// Map Slack's error strings onto the retry taxonomy.
pub(crate) fn map_api_error(error: &str) -> ChatError {
    match error {
        "message_not_found" => ChatError::MessageNotFound,
        "channel_not_found" => ChatError::ChannelNotFound,
        "not_in_channel" => ChatError::NotInChannel,
        other => ChatError::Api(other.to_string()),
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage, ChatError> {
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }
        let resp = self.call("chat.postMessage", body).await?;
        Ok(PostedMessage {
            channel: resp.channel.unwrap_or_else(|| channel.to_string()),
            ts: resp.ts.unwrap_or_default(),
        })
    }

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<(), ChatError> {
        let body = serde_json::json!({ "channel": channel, "ts": ts, "text": text });
        self.call("chat.update", body).await?;
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChatError> {
        let body = serde_json::json!({ "channel": channel, "timestamp": ts, "name": name });
        match self.call("reactions.add", body).await {
            Ok(_) => Ok(()),
            // Idempotent from the caller's view
            Err(ChatError::Api(e)) if e == "already_reacted" => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChatError> {
        let body = serde_json::json!({ "channel": channel, "timestamp": ts, "name": name });
        match self.call("reactions.remove", body).await {
            Ok(_) => Ok(()),
            Err(ChatError::Api(e)) if e == "no_reaction" => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn fetch_thread_messages(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadTurn>, ChatError> {
        let body = serde_json::json!({ "channel": channel, "ts": thread_ts, "limit": 200 });
        let resp = self.call("conversations.replies", body).await?;
        let turns = resp
            .messages
            .unwrap_or_default()
            .into_iter()
            // System notices (joins, topic changes) are noise for the agent
            .filter(|m| m.subtype.is_none())
            .map(|m| ThreadTurn {
                role: if m.bot_id.is_some() {
                    "assistant".to_string()
                } else {
                    "user".to_string()
                },
                content: m.text,
                timestamp: m.ts,
            })
            .collect();
        Ok(turns)
    }
}

#[cfg(test)]
#[path = "slack_tests.rs"]
mod tests;
