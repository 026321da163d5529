// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-worker: the per-thread worker process.
//!
//! One worker serves one conversation thread, one message at a time. It
//! owns the session branch of the user's repository, drives the agent
//! subprocess, streams progress through the response queue, and exits on
//! its own once the thread goes quiet.

pub mod config;
pub mod consumer;
pub mod workspace;

pub use config::{WorkerConfig, WorkerConfigError};
pub use consumer::{WorkerConsumer, WorkerExit};
pub use workspace::{GitWorkspace, Workspace, WorkspaceError};
