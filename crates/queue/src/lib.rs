// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-queue: named durable FIFO queues with singleton keys, retry
//! policy and priority.
//!
//! The [`Queue`] trait is the contract every component programs against;
//! [`PgQueue`] is the production Postgres implementation and
//! [`MemoryQueue`] the in-process fake used throughout the test suite.
//! Handlers must be idempotent: delivery is at-least-once.

pub mod job;
pub mod queue;

mod pg;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use job::{JobError, JobId, JobState, QueueJob, QueueSize, SendOptions, WorkOptions};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryQueue;
pub use pg::PgQueue;
pub use queue::{JobHandler, Queue, QueueError, WorkHandle};
