// SPDX-License-Identifier: MIT

//! Response egress: worker envelopes → chat updates and reactions.
//!
//! Consumes the `thread_response` queue. The content path throttles
//! message edits; the reaction path converges the user's original message
//! to exactly one terminal reaction. Permanent chat errors drop the
//! operation; transient ones re-raise so the queue retries the envelope.

use async_trait::async_trait;
use std::sync::Arc;

use peerbot_core::{ReactionKind, ThreadResponse};
use peerbot_queue::{JobError, JobHandler, QueueJob};

use crate::client::{ChatClient, ChatError};
use crate::throttle::UpdateThrottle;

/// Queue consumed by the egress.
pub const THREAD_RESPONSE_QUEUE: &str = "thread_response";

/// Platform emoji names for the reaction states.
#[derive(Debug, Clone)]
pub struct Reactions {
    pub working: String,
    pub success: String,
    pub failure: String,
}

impl Default for Reactions {
    fn default() -> Self {
        Self {
            working: "hourglass_flowing_sand".to_string(),
            success: "white_check_mark".to_string(),
            failure: "x".to_string(),
        }
    }
}

impl Reactions {
    pub fn name(&self, kind: ReactionKind) -> &str {
        match kind {
            ReactionKind::Working => &self.working,
            ReactionKind::Success => &self.success,
            ReactionKind::Failure => &self.failure,
        }
    }
}

/// `thread_response` consumer.
pub struct EgressConsumer<C: ChatClient> {
    chat: Arc<C>,
    throttle: UpdateThrottle<C>,
    reactions: Reactions,
}

impl<C: ChatClient> EgressConsumer<C> {
    pub fn new(chat: Arc<C>) -> Self {
        let throttle = UpdateThrottle::new(chat.clone());
        Self {
            chat,
            throttle,
            reactions: Reactions::default(),
        }
    }

    pub fn with_throttle(chat: Arc<C>, throttle: UpdateThrottle<C>) -> Self {
        Self {
            chat,
            throttle,
            reactions: Reactions::default(),
        }
    }

    /// Handle one response envelope.
    pub async fn handle_response(&self, resp: &ThreadResponse) -> Result<(), JobError> {
        if let Some(content) = &resp.content {
            // Rendering to chat-native blocks happens at this boundary;
            // text passes through unchanged.
            match self
                .throttle
                .offer(&resp.channel_id, &resp.message_id, content)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_permanent() => {
                    tracing::info!(
                        channel = %resp.channel_id,
                        ts = %resp.message_id,
                        error = %e,
                        "dropping update for missing message"
                    );
                }
                Err(e) => return Err(JobError::Retry(e.to_string())),
            }
        }

        if let Some(target) = &resp.original_message_ts {
            self.converge_reactions(resp, target).await?;
        }

        Ok(())
    }

    /// Drive the original message's reaction to match the response state.
    async fn converge_reactions(
        &self,
        resp: &ThreadResponse,
        target: &str,
    ) -> Result<(), JobError> {
        let channel = &resp.channel_id;

        let terminal = if resp.error.is_some() {
            Some(ReactionKind::Failure)
        } else if resp.is_done {
            Some(ReactionKind::Success)
        } else {
            resp.reaction.filter(|k| *k != ReactionKind::Working)
        };

        match terminal {
            Some(kind) => {
                self.reaction_op(
                    self.chat
                        .remove_reaction(channel, target, &self.reactions.working),
                )
                .await?;
                self.reaction_op(
                    self.chat
                        .add_reaction(channel, target, self.reactions.name(kind)),
                )
                .await?;
            }
            None if resp.content.is_some() || resp.reaction == Some(ReactionKind::Working) => {
                self.reaction_op(
                    self.chat
                        .add_reaction(channel, target, &self.reactions.working),
                )
                .await?;
            }
            None => {}
        }
        Ok(())
    }

    async fn reaction_op(
        &self,
        op: impl std::future::Future<Output = Result<(), ChatError>>,
    ) -> Result<(), JobError> {
        match op.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_permanent() => {
                tracing::info!(error = %e, "dropping reaction op");
                Ok(())
            }
            Err(e) => Err(JobError::Retry(e.to_string())),
        }
    }
}

#[async_trait]
impl<C: ChatClient> JobHandler for EgressConsumer<C> {
    async fn handle(&self, job: QueueJob) -> Result<(), JobError> {
        let resp: ThreadResponse = serde_json::from_value(job.data)
            .map_err(|e| JobError::Fail(format!("malformed thread response: {e}")))?;
        self.handle_response(&resp).await
    }
}

#[cfg(test)]
#[path = "egress_tests.rs"]
mod tests;
