// SPDX-License-Identifier: MIT

//! Recording chat client for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{ChatClient, ChatError, PostedMessage, ThreadTurn};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Post {
        channel: String,
        thread_ts: Option<String>,
        text: String,
    },
    Update {
        channel: String,
        ts: String,
        text: String,
    },
    AddReaction {
        ts: String,
        name: String,
    },
    RemoveReaction {
        ts: String,
        name: String,
    },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<ChatCall>,
    /// Reactions currently on each message ts.
    reactions: HashMap<String, Vec<String>>,
    threads: HashMap<String, Vec<ThreadTurn>>,
    /// Error script for update_message calls, consumed in order.
    update_errors: Vec<ChatError>,
    post_counter: u64,
}

/// In-memory chat client that records calls and tracks reaction state.
#[derive(Clone, Default)]
pub struct FakeChatClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.state.lock().calls.clone()
    }

    /// Reactions currently on a message.
    pub fn reactions(&self, ts: &str) -> Vec<String> {
        self.state.lock().reactions.get(ts).cloned().unwrap_or_default()
    }

    /// Latest update text for a message ts.
    pub fn last_update(&self, ts: &str) -> Option<String> {
        self.state.lock().calls.iter().rev().find_map(|c| match c {
            ChatCall::Update { ts: t, text, .. } if t == ts => Some(text.clone()),
            _ => None,
        })
    }

    pub fn update_count(&self, ts: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ChatCall::Update { ts: t, .. } if t == ts))
            .count()
    }

    pub fn seed_thread(&self, thread_ts: &str, turns: Vec<ThreadTurn>) {
        self.state.lock().threads.insert(thread_ts.to_string(), turns);
    }

    /// Queue an error for the next update_message call.
    pub fn fail_next_update(&self, error: ChatError) {
        self.state.lock().update_errors.push(error);
    }
}

#[async_trait]
impl ChatClient for FakeChatClient {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage, ChatError> {
        let mut state = self.state.lock();
        state.post_counter += 1;
        let ts = format!("fake.{:06}", state.post_counter);
        state.calls.push(ChatCall::Post {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            text: text.to_string(),
        });
        Ok(PostedMessage {
            channel: channel.to_string(),
            ts,
        })
    }

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        if !state.update_errors.is_empty() {
            return Err(state.update_errors.remove(0));
        }
        state.calls.push(ChatCall::Update {
            channel: channel.to_string(),
            ts: ts.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn add_reaction(&self, _channel: &str, ts: &str, name: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::AddReaction {
            ts: ts.to_string(),
            name: name.to_string(),
        });
        let reactions = state.reactions.entry(ts.to_string()).or_default();
        if !reactions.iter().any(|r| r == name) {
            reactions.push(name.to_string());
        }
        Ok(())
    }

    async fn remove_reaction(&self, _channel: &str, ts: &str, name: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::RemoveReaction {
            ts: ts.to_string(),
            name: name.to_string(),
        });
        if let Some(reactions) = state.reactions.get_mut(ts) {
            reactions.retain(|r| r != name);
        }
        Ok(())
    }

    async fn fetch_thread_messages(
        &self,
        _channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadTurn>, ChatError> {
        Ok(self
            .state
            .lock()
            .threads
            .get(thread_ts)
            .cloned()
            .unwrap_or_default())
    }
}
