// SPDX-License-Identifier: MIT

//! Inbound chat events and the ingress filters.

use serde::{Deserialize, Serialize};

/// One message event from the chat platform, as delivered by the events
/// connector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(default)]
    pub event_type: String,
    /// Platform subtype (edits, deletes, joins, broadcasts...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    /// Set when the sender is a bot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_display_name: Option<String>,
}

/// Subtypes that never trigger work.
const IGNORED_SUBTYPES: &[&str] = &[
    "message_changed",
    "message_deleted",
    "channel_join",
    "channel_leave",
    "group_join",
    "group_leave",
    "thread_broadcast",
    "bot_message",
];

impl ChatEvent {
    /// True when this event came from ourselves or another bot.
    pub fn is_from_bot(&self, bot_user_id: &str, bot_id: &str) -> bool {
        if self.bot_id.is_some() {
            return true;
        }
        if !bot_user_id.is_empty() && self.user_id == bot_user_id {
            return true;
        }
        !bot_id.is_empty() && self.user_id == bot_id
    }

    /// True for subtypes the dispatcher never acts on.
    pub fn is_ignored_subtype(&self) -> bool {
        self.subtype
            .as_deref()
            .map(|s| IGNORED_SUBTYPES.contains(&s))
            .unwrap_or(false)
    }

    /// Minimal coordinates check; anything missing is a validation drop.
    pub fn has_required_fields(&self) -> bool {
        !self.team_id.is_empty()
            && !self.channel_id.is_empty()
            && !self.user_id.is_empty()
            && !self.ts.is_empty()
    }

    /// Thread this message belongs to: its thread, or itself as the seed
    /// of a new one.
    pub fn thread_id(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
