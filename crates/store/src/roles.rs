// SPDX-License-Identifier: MIT

//! Per-user database role operations.
//!
//! Thin wrappers over the `create_user_role` / `alter_user_role_password` /
//! `drop_user_role` SQL functions (see [`crate::schema`]). The credential
//! store composes these with cluster secret writes and owns rollback.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

/// Role operation errors.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    /// Connection-level failure; retryable.
    #[error("role operation failed: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RoleError {
    fn from(e: sqlx::Error) -> Self {
        RoleError::Database(e.to_string())
    }
}

/// Database role management boundary.
#[async_trait]
pub trait DbRoles: Send + Sync + 'static {
    /// Create (or re-key) the role for `user_id`. Returns the role name.
    async fn create_user_role(&self, user_id: &str, password: &str) -> Result<String, RoleError>;

    /// Rotate the role's password.
    async fn alter_role_password(&self, user_id: &str, password: &str) -> Result<(), RoleError>;

    /// Drop the role if it exists.
    async fn drop_user_role(&self, user_id: &str) -> Result<(), RoleError>;
}

/// Postgres implementation calling the schema's SECURITY DEFINER functions.
#[derive(Clone)]
pub struct PgRoles {
    pool: PgPool,
}

impl PgRoles {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DbRoles for PgRoles {
    async fn create_user_role(&self, user_id: &str, password: &str) -> Result<String, RoleError> {
        let row = sqlx::query("SELECT create_user_role($1, $2) AS role_name")
            .bind(user_id)
            .bind(password)
            .fetch_one(&self.pool)
            .await?;
        let role: String = row.try_get("role_name")?;
        tracing::info!(user_id, %role, "ensured database role");
        Ok(role)
    }

    async fn alter_role_password(&self, user_id: &str, password: &str) -> Result<(), RoleError> {
        sqlx::query("SELECT alter_user_role_password($1, $2)")
            .bind(user_id)
            .bind(password)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_user_role(&self, user_id: &str) -> Result<(), RoleError> {
        sqlx::query("SELECT drop_user_role($1)")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory role registry for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct MemoryRoles {
    roles: std::sync::Arc<parking_lot::Mutex<std::collections::HashMap<String, String>>>,
    fail_creates: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryRoles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` create calls (for rollback tests).
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn role_password(&self, user_id: &str) -> Option<String> {
        self.roles.lock().get(user_id).cloned()
    }

    pub fn role_count(&self) -> usize {
        self.roles.lock().len()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl DbRoles for MemoryRoles {
    async fn create_user_role(&self, user_id: &str, password: &str) -> Result<String, RoleError> {
        use std::sync::atomic::Ordering;
        if self.fail_creates.load(Ordering::SeqCst) > 0 {
            self.fail_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(RoleError::Database("injected failure".to_string()));
        }
        self.roles
            .lock()
            .insert(user_id.to_string(), password.to_string());
        Ok(format!("peerbot_user_{}", user_id.to_lowercase()))
    }

    async fn alter_role_password(&self, user_id: &str, password: &str) -> Result<(), RoleError> {
        self.roles
            .lock()
            .insert(user_id.to_string(), password.to_string());
        Ok(())
    }

    async fn drop_user_role(&self, user_id: &str) -> Result<(), RoleError> {
        self.roles.lock().remove(user_id);
        Ok(())
    }
}
