// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-agent: the coding-agent subprocess boundary.
//!
//! The agent is a black box that reads a prompt and emits a structured
//! NDJSON event stream on stdout. [`AgentRunner`] spawns it, parses the
//! stream into [`AgentEvent`]s on a channel, and reports a terminal
//! [`AgentOutcome`]. Resumption rides on the session id the agent assigns
//! on its first run.

pub mod event;
pub mod process;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use event::{AgentEvent, TaskItem, TaskStatus};
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeAgent;
pub use process::ProcessAgent;
pub use runner::{AgentError, AgentOutcome, AgentRequest, AgentRunner, ContextTurn};
