// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-chat: the chat-platform boundary.
//!
//! [`ChatClient`] is the typed client the rest of the system programs
//! against; [`SlackClient`] speaks the Slack Web API. The egress consumer
//! turns worker response envelopes into throttled message updates and a
//! converging reaction state on the user's original message.

pub mod client;
pub mod egress;
pub mod slack;
pub mod throttle;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use client::{ChatClient, ChatError, PostedMessage, ThreadTurn};
pub use egress::{EgressConsumer, Reactions};
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeChatClient;
pub use slack::SlackClient;
pub use throttle::UpdateThrottle;
