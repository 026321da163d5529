// SPDX-License-Identifier: MIT

use super::*;
use peerbot_cluster::{FakeCluster, ManifestConfig, ReconcilerConfig};
use peerbot_core::test_support::request;
use peerbot_core::{FakeClock, RoutingMetadata, SessionKey};
use peerbot_queue::{JobId, JobState, MemoryQueue};
use peerbot_store::{ConversationStatus, MemoryConversationStore, MemoryRoles};
use std::time::Duration;

struct Harness {
    orchestrator: Orchestrator<MemoryRoles, FakeCluster, FakeClock>,
    queue: MemoryQueue,
    cluster: FakeCluster,
    conversations: MemoryConversationStore,
}

fn harness() -> Harness {
    let clock = FakeClock::new();
    let cluster = FakeCluster::new(clock.clone());
    cluster.set_auto_ready(true);
    let queue = MemoryQueue::new();
    let conversations = MemoryConversationStore::new();

    let reconciler = Arc::new(Reconciler::new(
        cluster.clone(),
        clock.clone(),
        ReconcilerConfig {
            monitor_interval: Duration::from_millis(2),
            monitor_timeout: Duration::from_millis(50),
        },
        ManifestConfig::default(),
    ));
    let credentials = Arc::new(CredentialStore::new(
        MemoryRoles::new(),
        cluster.clone(),
        "postgres://{user}:{password}@db/peerbot",
    ));
    let idle = Arc::new(IdleScaler::new(
        cluster.clone(),
        clock.clone(),
        Duration::from_secs(5 * 60),
    ));

    let orchestrator = Orchestrator::new(
        Arc::new(queue.clone()),
        reconciler,
        credentials,
        Arc::new(conversations.clone()),
        idle,
    );
    Harness {
        orchestrator,
        queue,
        cluster,
        conversations,
    }
}

#[tokio::test]
async fn new_thread_creates_deployment_and_routes() {
    let h = harness();
    let req = request("U01", "1727.100");

    let name = h.orchestrator.handle_request(&req).await.unwrap();

    assert_eq!(name, "worker-slack-t01-c01-u01-1727.100".replace('.', "-"));
    assert_eq!(h.cluster.deployment_names(), vec![name.clone()]);
    assert!(h
        .cluster
        .secret("peerbot-user-secret-user-alice")
        .is_some());

    let thread_queue = format!("thread_message_{name}");
    let payloads = h.queue.payloads(&thread_queue);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["routingMetadata"]["targetThreadId"], "1727.100");

    let record = h
        .conversations
        .get(&SessionKey::from_raw("slack-T01-C01-U01-1727.100"), "T01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ConversationStatus::Active);
}

#[tokio::test]
async fn duplicate_request_does_not_duplicate_anything() {
    let h = harness();
    let req = request("U01", "1727.100");

    let first = h.orchestrator.handle_request(&req).await.unwrap();
    let second = h.orchestrator.handle_request(&req).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.cluster.deployment_names().len(), 1);
    // Same (session key, message id): thread send deduplicated
    let payloads = h.queue.payloads(&format!("thread_message_{first}"));
    assert_eq!(payloads.len(), 1);
}

#[tokio::test]
async fn existing_thread_scales_idle_deployment_up() {
    let h = harness();
    let mut first = request("U01", "1727.100");
    first.message_id = "1727.200".to_string();
    let name = h.orchestrator.handle_request(&first).await.unwrap();

    // Thread idled out and was parked
    h.cluster.scale_deployment(&name, 0).await.unwrap();

    let mut reply = request("U01", "1727.100");
    reply.message_id = "1727.300".to_string();
    reply.routing_metadata = Some(RoutingMetadata {
        target_thread_id: "1727.100".to_string(),
        agent_session_id: None,
        user_id: "U01".to_string(),
    });
    h.orchestrator.handle_request(&reply).await.unwrap();

    assert_eq!(h.cluster.deployment_names().len(), 1);
    let scale_calls = h.cluster.scale_calls();
    assert_eq!(scale_calls.last(), Some(&(name.clone(), 1)));
    assert_eq!(h.queue.payloads(&format!("thread_message_{name}")).len(), 2);
}

#[tokio::test]
async fn existing_thread_with_deleted_deployment_recreates_it() {
    let h = harness();
    let mut reply = request("U01", "1727.100");
    reply.routing_metadata = Some(RoutingMetadata {
        target_thread_id: "1727.100".to_string(),
        agent_session_id: Some("agent-abc".to_string()),
        user_id: "U01".to_string(),
    });

    let name = h.orchestrator.handle_request(&reply).await.unwrap();
    assert_eq!(h.cluster.deployment_names(), vec![name]);
}

#[tokio::test]
async fn restarted_orchestrator_rediscovers_deployment() {
    let h = harness();
    let req = request("U01", "1727.100");
    let name = h.orchestrator.handle_request(&req).await.unwrap();

    // A fresh orchestrator over the same cluster (process restart): the
    // label-selector lookup finds the deployment instead of duplicating.
    let clock = FakeClock::new();
    let reconciler = Arc::new(Reconciler::new(
        h.cluster.clone(),
        clock.clone(),
        ReconcilerConfig {
            monitor_interval: Duration::from_millis(2),
            monitor_timeout: Duration::from_millis(50),
        },
        ManifestConfig::default(),
    ));
    let restarted = Orchestrator::new(
        Arc::new(h.queue.clone()),
        reconciler,
        Arc::new(CredentialStore::new(
            MemoryRoles::new(),
            h.cluster.clone(),
            "postgres://{user}:{password}@db/peerbot",
        )),
        Arc::new(h.conversations.clone()),
        Arc::new(IdleScaler::new(
            h.cluster.clone(),
            clock,
            Duration::from_secs(5 * 60),
        )),
    );

    let mut second = request("U01", "1727.100");
    second.message_id = "1727.400".to_string();
    let rediscovered = restarted.handle_request(&second).await.unwrap();

    assert_eq!(rediscovered, name);
    assert_eq!(h.cluster.deployment_names().len(), 1);
    assert_eq!(h.queue.payloads(&format!("thread_message_{name}")).len(), 2);
}

fn job_with(data: serde_json::Value, retry_count: u32) -> peerbot_queue::QueueJob {
    peerbot_queue::QueueJob {
        id: JobId::new(),
        name: "messages".to_string(),
        data,
        state: JobState::Active,
        retry_count,
        retry_limit: 3,
        priority: 0,
        singleton_key: None,
        created_at_ms: 0,
        start_after_ms: 0,
    }
}

#[tokio::test]
async fn malformed_payload_fails_permanently() {
    let h = harness();
    let err = h
        .orchestrator
        .handle(job_with(serde_json::json!({"not": "a request"}), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Fail(_)));
}

#[tokio::test]
async fn invalid_request_fails_permanently() {
    let h = harness();
    let mut req = request("", "1727.100");
    req.user_id = String::new();
    let payload = serde_json::to_value(&req).unwrap();

    let err = h.orchestrator.handle(job_with(payload, 0)).await.unwrap_err();
    assert!(matches!(err, JobError::Fail(_)));
}

#[tokio::test]
async fn exhausted_retries_mark_conversation_errored() {
    let h = harness();
    let req = request("U01", "1727.100");
    let payload = serde_json::to_value(&req).unwrap();

    // Cluster down: credential ensure fails after the record upsert
    h.cluster.fail_next_calls(10);
    let err = h
        .orchestrator
        .handle(job_with(payload, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Retry(_)));

    let record = h
        .conversations
        .get(&SessionKey::from_raw("slack-T01-C01-U01-1727.100"), "T01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ConversationStatus::Error);
}
