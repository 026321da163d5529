// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-store: Postgres persistence for conversations and per-user
//! isolation.
//!
//! Three concerns live here: the conversation store (agent session
//! resumption across worker restarts), the per-user role DDL behind the
//! credential store, and the cached username → repository directory.

pub mod conversations;
pub mod pool;
pub mod repos;
pub mod roles;
pub mod schema;

pub use conversations::{
    ConversationRecord, ConversationStatus, ConversationStore, PgConversationStore,
};
#[cfg(any(test, feature = "test-support"))]
pub use conversations::MemoryConversationStore;
pub use pool::connect_user_pool;
pub use repos::{CachedRepoDirectory, GitHosting, RepoError, TemplateHosting};
#[cfg(any(test, feature = "test-support"))]
pub use repos::StaticHosting;
pub use roles::{DbRoles, PgRoles, RoleError};
#[cfg(any(test, feature = "test-support"))]
pub use roles::MemoryRoles;
pub use schema::ensure_schema;

/// Store-level errors shared by the Postgres implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection-level failure; callers may retry.
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
