// SPDX-License-Identifier: MIT

//! Shared builders for tests across the workspace.

use crate::envelope::{AgentOptions, PlatformMetadata, WorkerDeploymentRequest};

/// A complete, valid ingress request for user `user_id` in thread
/// `thread_id`. Tests mutate the fields they care about.
pub fn request(user_id: &str, thread_id: &str) -> WorkerDeploymentRequest {
    WorkerDeploymentRequest {
        user_id: user_id.to_string(),
        bot_id: "B01".to_string(),
        agent_session_id: None,
        thread_id: thread_id.to_string(),
        platform: "slack".to_string(),
        platform_user_id: user_id.to_string(),
        message_id: "1727.200".to_string(),
        message_text: "build me a widget".to_string(),
        channel_id: "C01".to_string(),
        platform_metadata: PlatformMetadata {
            team_id: "T01".to_string(),
            user_display_name: "alice".to_string(),
            repository_url: "https://github.com/org/alice-workspace".to_string(),
            slack_response_channel: "C01".to_string(),
            slack_response_ts: "1727.201".to_string(),
            original_message_ts: "1727.200".to_string(),
        },
        claude_options: AgentOptions::default(),
        routing_metadata: None,
    }
}
