// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-core: shared domain types for the peerbot orchestrator.
//!
//! Everything here is pure: session-key derivation, wire envelopes,
//! the thread-session state machine, and the rate limiter. No I/O.

pub mod macros;

pub mod clock;
pub mod envelope;
pub mod key;
pub mod rate_limit;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use envelope::{
    AgentOptions, PlatformMetadata, ReactionKind, RoutingMetadata, ThreadResponse,
    WorkerDeploymentRequest,
};
pub use key::{
    branch_name, deployment_name, safe_name, thread_queue_name, SessionKey, CLUSTER_NAME_MAX,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use session::{SessionStatus, ThreadSession};
