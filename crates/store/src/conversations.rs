// SPDX-License-Identifier: MIT

//! Conversation persistence.
//!
//! One row per `(session_key, tenant_id)`. The agent session id stored
//! here is what lets a fresh worker resume the same agent conversation
//! after an idle exit or a crash. Writes are last-write-wins upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use peerbot_core::SessionKey;

use crate::StoreError;

/// Terminal bookkeeping status for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Error,
}

peerbot_core::simple_display! {
    ConversationStatus {
        Active => "active",
        Completed => "completed",
        Error => "error",
    }
}

/// Persisted conversation state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationRecord {
    pub session_key: SessionKey,
    pub tenant_id: String,
    pub agent_session_id: Option<String>,
    pub from_user_id: String,
    pub bot_id: Option<String>,
    pub status: ConversationStatus,
    /// Structured event log accumulated across turns.
    pub conversation_data: serde_json::Value,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl ConversationRecord {
    pub fn new(
        session_key: SessionKey,
        tenant_id: impl Into<String>,
        from_user_id: impl Into<String>,
    ) -> Self {
        Self {
            session_key,
            tenant_id: tenant_id.into(),
            agent_session_id: None,
            from_user_id: from_user_id.into(),
            bot_id: None,
            status: ConversationStatus::Active,
            conversation_data: serde_json::json!({}),
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }
}

/// Conversation store boundary.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn get(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Insert or update the record for `(session_key, tenant_id)`.
    async fn upsert(&self, record: &ConversationRecord) -> Result<(), StoreError>;

    /// Record the agent session id assigned on the first turn.
    async fn set_agent_session(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
        agent_session_id: &str,
    ) -> Result<(), StoreError>;

    /// Mark the conversation's terminal status.
    async fn set_status(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
        status: ConversationStatus,
    ) -> Result<(), StoreError>;

    /// Session keys of every conversation still marked active. Feeds the
    /// orphan sweeper's tracked-active classification.
    async fn list_active_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Postgres conversation store.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    /// Worker processes must build `pool` with
    /// [`crate::pool::connect_user_pool`] so every connection carries the
    /// RLS session variable; the per-user role sees only its own rows.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<ConversationRecord, StoreError> {
    let session_key: String = row.try_get("session_key")?;
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(ConversationRecord {
        session_key: SessionKey::from_raw(session_key),
        tenant_id: row.try_get("tenant_id")?,
        agent_session_id: row.try_get("agent_session_id")?,
        from_user_id: row.try_get("from_user_id")?,
        bot_id: row.try_get("bot_id")?,
        status: match status.as_str() {
            "completed" => ConversationStatus::Completed,
            "error" => ConversationStatus::Error,
            _ => ConversationStatus::Active,
        },
        conversation_data: row.try_get("conversation_data")?,
        created_at_ms: created_at.timestamp_millis().max(0) as u64,
        updated_at_ms: updated_at.timestamp_millis().max(0) as u64,
    })
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT session_key, tenant_id, agent_session_id, from_user_id, bot_id,
                    status, conversation_data, created_at, updated_at
             FROM conversations
             WHERE session_key = $1 AND tenant_id = $2",
        )
        .bind(session_key.as_str())
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversations
                 (session_key, tenant_id, agent_session_id, from_user_id, bot_id,
                  status, conversation_data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (session_key, tenant_id) DO UPDATE SET
                 agent_session_id = EXCLUDED.agent_session_id,
                 bot_id = EXCLUDED.bot_id,
                 status = EXCLUDED.status,
                 conversation_data = EXCLUDED.conversation_data,
                 updated_at = now()",
        )
        .bind(record.session_key.as_str())
        .bind(&record.tenant_id)
        .bind(&record.agent_session_id)
        .bind(&record.from_user_id)
        .bind(&record.bot_id)
        .bind(record.status.to_string())
        .bind(&record.conversation_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_agent_session(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
        agent_session_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE conversations
             SET agent_session_id = $3, updated_at = now()
             WHERE session_key = $1 AND tenant_id = $2",
        )
        .bind(session_key.as_str())
        .bind(tenant_id)
        .bind(agent_session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
        status: ConversationStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE conversations
             SET status = $3, updated_at = now()
             WHERE session_key = $1 AND tenant_id = $2",
        )
        .bind(session_key.as_str())
        .bind(tenant_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active_keys(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT session_key FROM conversations WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("session_key").map_err(StoreError::from))
            .collect()
    }
}

/// In-memory conversation store for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct MemoryConversationStore {
    records: std::sync::Arc<parking_lot::Mutex<Vec<ConversationRecord>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ConversationRecord> {
        self.records.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| &r.session_key == session_key && r.tenant_id == tenant_id)
            .cloned())
    }

    async fn upsert(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        match records
            .iter_mut()
            .find(|r| r.session_key == record.session_key && r.tenant_id == record.tenant_id)
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn set_agent_session(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
        agent_session_id: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if let Some(r) = records
            .iter_mut()
            .find(|r| &r.session_key == session_key && r.tenant_id == tenant_id)
        {
            r.agent_session_id = Some(agent_session_id.to_string());
        }
        Ok(())
    }

    async fn set_status(
        &self,
        session_key: &SessionKey,
        tenant_id: &str,
        status: ConversationStatus,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if let Some(r) = records
            .iter_mut()
            .find(|r| &r.session_key == session_key && r.tenant_id == tenant_id)
        {
            r.status = status;
        }
        Ok(())
    }

    async fn list_active_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.status == ConversationStatus::Active)
            .map(|r| r.session_key.to_string())
            .collect())
    }
}

#[cfg(test)]
#[path = "conversations_tests.rs"]
mod tests;
