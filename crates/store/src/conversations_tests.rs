// SPDX-License-Identifier: MIT

use super::*;

fn record() -> ConversationRecord {
    ConversationRecord::new(SessionKey::from_raw("slack-T01-C01-1727.100"), "T01", "U01")
}

#[tokio::test]
async fn upsert_then_get() {
    let store = MemoryConversationStore::new();
    store.upsert(&record()).await.unwrap();

    let found = store
        .get(&SessionKey::from_raw("slack-T01-C01-1727.100"), "T01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.from_user_id, "U01");
    assert_eq!(found.status, ConversationStatus::Active);
}

#[tokio::test]
async fn upsert_overwrites_same_key() {
    let store = MemoryConversationStore::new();
    store.upsert(&record()).await.unwrap();

    let mut updated = record();
    updated.agent_session_id = Some("agent-xyz".to_string());
    store.upsert(&updated).await.unwrap();

    assert_eq!(store.records().len(), 1);
    let found = store
        .get(&SessionKey::from_raw("slack-T01-C01-1727.100"), "T01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.agent_session_id.as_deref(), Some("agent-xyz"));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let store = MemoryConversationStore::new();
    store.upsert(&record()).await.unwrap();

    let other_tenant = store
        .get(&SessionKey::from_raw("slack-T01-C01-1727.100"), "T99")
        .await
        .unwrap();
    assert!(other_tenant.is_none());
}

#[tokio::test]
async fn set_agent_session_persists() {
    let store = MemoryConversationStore::new();
    store.upsert(&record()).await.unwrap();

    let key = SessionKey::from_raw("slack-T01-C01-1727.100");
    store.set_agent_session(&key, "T01", "agent-123").await.unwrap();

    let found = store.get(&key, "T01").await.unwrap().unwrap();
    assert_eq!(found.agent_session_id.as_deref(), Some("agent-123"));
}

#[tokio::test]
async fn set_status_marks_error() {
    let store = MemoryConversationStore::new();
    store.upsert(&record()).await.unwrap();

    let key = SessionKey::from_raw("slack-T01-C01-1727.100");
    store
        .set_status(&key, "T01", ConversationStatus::Error)
        .await
        .unwrap();

    let found = store.get(&key, "T01").await.unwrap().unwrap();
    assert_eq!(found.status, ConversationStatus::Error);
}
