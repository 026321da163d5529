// SPDX-License-Identifier: MIT

//! Ingress dispatcher: chat event → rate limit → session resolution →
//! enqueue.
//!
//! The dispatcher touches chat and the database but never the cluster;
//! every cluster mutation belongs to the orchestrator. Its only output is
//! one job on the `messages` queue per admitted event, deduplicated by
//! `(session key, message id)`.

pub mod event;
pub mod sessions;
pub mod usernames;

use std::collections::HashSet;
use std::sync::Arc;

use peerbot_chat::{ChatClient, ChatError};
use peerbot_core::{
    AgentOptions, Clock, PlatformMetadata, RateLimitConfig, RateLimiter, RoutingMetadata,
    SessionKey, SessionStatus, ThreadSession, WorkerDeploymentRequest,
};
use peerbot_queue::{Queue, QueueError, SendOptions};
use peerbot_store::{CachedRepoDirectory, ConversationStore, RepoError, StoreError};

pub use event::ChatEvent;
use sessions::SessionRegistry;
use usernames::UsernameCache;

/// Ingress queue consumed by the orchestrator.
pub const MESSAGES_QUEUE: &str = "messages";

/// Dispatcher-level settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub bot_user_id: String,
    pub bot_id: String,
    /// Empty set admits everyone.
    pub allow_list: HashSet<String>,
    /// Deny wins over allow.
    pub deny_list: HashSet<String>,
    /// Base agent options copied into every request.
    pub agent_options: AgentOptions,
    pub rate_limit: RateLimitConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bot_user_id: String::new(),
            bot_id: String::new(),
            allow_list: HashSet::new(),
            deny_list: HashSet::new(),
            agent_options: AgentOptions::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Job sent; session advanced to enqueued.
    Enqueued { session_key: SessionKey },
    /// Singleton key deduplicated a redelivered event.
    Duplicate { session_key: SessionKey },
    /// Filtered before any side effect.
    Ignored(&'static str),
    /// Allow/deny list rejection (user was told).
    Denied,
    /// Rate limit rejection (user was told).
    RateLimited,
}

/// Dispatcher failures; all retryable at the event-delivery layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The ingress pipeline.
pub struct Dispatcher<C: Clock> {
    config: DispatcherConfig,
    chat: Arc<dyn ChatClient>,
    queue: Arc<dyn Queue>,
    conversations: Arc<dyn ConversationStore>,
    repos: Arc<CachedRepoDirectory<C>>,
    usernames: UsernameCache,
    rate_limiter: RateLimiter<C>,
    sessions: SessionRegistry<C>,
    clock: C,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(
        config: DispatcherConfig,
        chat: Arc<dyn ChatClient>,
        queue: Arc<dyn Queue>,
        conversations: Arc<dyn ConversationStore>,
        repos: Arc<CachedRepoDirectory<C>>,
        clock: C,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit.clone(), clock.clone());
        Self {
            config,
            chat,
            queue,
            conversations,
            repos,
            usernames: UsernameCache::new(),
            rate_limiter,
            sessions: SessionRegistry::new(clock.clone()),
            clock,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter<C> {
        &self.rate_limiter
    }

    pub fn sessions(&self) -> &SessionRegistry<C> {
        &self.sessions
    }

    /// Run one event through the full ingress pipeline.
    pub async fn handle_event(&self, event: &ChatEvent) -> Result<DispatchOutcome, DispatchError> {
        if event.is_from_bot(&self.config.bot_user_id, &self.config.bot_id) {
            return Ok(DispatchOutcome::Ignored("bot message"));
        }
        if event.is_ignored_subtype() {
            return Ok(DispatchOutcome::Ignored("ignored subtype"));
        }
        if !event.has_required_fields() {
            tracing::debug!(?event, "dropping malformed event");
            return Ok(DispatchOutcome::Ignored("missing fields"));
        }

        if self.config.deny_list.contains(&event.user_id)
            || (!self.config.allow_list.is_empty()
                && !self.config.allow_list.contains(&event.user_id))
        {
            tracing::info!(user_id = %event.user_id, "user not permitted");
            self.post_notice(event, "Sorry, you're not authorized to use this bot.")
                .await;
            return Ok(DispatchOutcome::Denied);
        }

        let session_key = SessionKey::derive(
            "slack",
            &event.team_id,
            &event.channel_id,
            &event.user_id,
            event.thread_ts.as_deref(),
            &event.ts,
        );

        if !self.rate_limiter.admit(&event.user_id) {
            tracing::info!(user_id = %event.user_id, "rate limit exceeded");
            self.post_notice(
                event,
                "You've reached the request limit. Give it a few minutes and try again.",
            )
            .await;
            return Ok(DispatchOutcome::RateLimited);
        }

        let display_name = event.user_display_name.as_deref().unwrap_or(&event.user_id);
        let username = self.usernames.resolve(&event.user_id, display_name);
        let repository_url = self.repos.resolve(&username).await?;

        let agent_session_id = self
            .conversations
            .get(&session_key, &event.team_id)
            .await?
            .and_then(|record| record.agent_session_id);

        let placeholder = self
            .chat
            .post_message(&event.channel_id, Some(event.thread_id()), "On it\u{2026}")
            .await?;

        let mut options = self.config.agent_options.clone();
        options.resume_session_id = agent_session_id.clone();

        let request = WorkerDeploymentRequest {
            user_id: event.user_id.clone(),
            bot_id: self.config.bot_id.clone(),
            agent_session_id: agent_session_id.clone(),
            thread_id: event.thread_id().to_string(),
            platform: "slack".to_string(),
            platform_user_id: event.user_id.clone(),
            message_id: event.ts.clone(),
            message_text: event.text.clone(),
            channel_id: event.channel_id.clone(),
            platform_metadata: PlatformMetadata {
                team_id: event.team_id.clone(),
                user_display_name: display_name.to_string(),
                repository_url,
                slack_response_channel: placeholder.channel,
                slack_response_ts: placeholder.ts,
                original_message_ts: event.ts.clone(),
            },
            claude_options: options,
            // An event inside an existing thread routes to that thread's
            // worker; a top-level message seeds a new one.
            routing_metadata: event.thread_ts.as_ref().map(|thread| RoutingMetadata {
                target_thread_id: thread.clone(),
                agent_session_id,
                user_id: event.user_id.clone(),
            }),
        };

        let payload = serde_json::to_value(&request).map_err(QueueError::from)?;
        let singleton_key = format!("{}:{}", session_key, event.ts);
        let sent = self
            .queue
            .send(
                MESSAGES_QUEUE,
                payload,
                SendOptions::default().with_singleton_key(singleton_key),
            )
            .await?;

        let now_ms = self.clock.epoch_ms();
        let mut session = ThreadSession::new(
            session_key.clone(),
            event.channel_id.clone(),
            event.user_id.clone(),
            username,
            request.platform_metadata.repository_url.clone(),
            now_ms,
        );

        match sent {
            Some(_) => {
                session.advance(SessionStatus::Enqueued, now_ms);
                self.sessions.upsert(session);
                tracing::info!(session_key = %session_key, "message enqueued");
                Ok(DispatchOutcome::Enqueued { session_key })
            }
            None => {
                tracing::debug!(session_key = %session_key, "duplicate event dropped");
                Ok(DispatchOutcome::Duplicate { session_key })
            }
        }
    }

    /// Best-effort user-visible notice; failures only log.
    async fn post_notice(&self, event: &ChatEvent, text: &str) {
        if let Err(e) = self
            .chat
            .post_message(&event.channel_id, Some(event.thread_id()), text)
            .await
        {
            tracing::warn!(error = %e, "failed to post notice");
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
