// SPDX-License-Identifier: MIT

use super::*;
use peerbot_chat::fake::{ChatCall, FakeChatClient};
use peerbot_core::FakeClock;
use peerbot_queue::MemoryQueue;
use peerbot_store::{MemoryConversationStore, StaticHosting};

struct Harness {
    dispatcher: Dispatcher<FakeClock>,
    chat: FakeChatClient,
    queue: MemoryQueue,
    conversations: MemoryConversationStore,
    clock: FakeClock,
}

fn harness(config: DispatcherConfig) -> Harness {
    let clock = FakeClock::new();
    let chat = FakeChatClient::new();
    let queue = MemoryQueue::new();
    let conversations = MemoryConversationStore::new();
    let hosting = StaticHosting::new();
    hosting.insert("user-alice", "https://github.com/org/alice-workspace");
    hosting.insert("user-u01", "https://github.com/org/u01-workspace");
    let repos = Arc::new(CachedRepoDirectory::new(
        Arc::new(hosting),
        clock.clone(),
    ));

    let dispatcher = Dispatcher::new(
        config,
        Arc::new(chat.clone()),
        Arc::new(queue.clone()),
        Arc::new(conversations.clone()),
        repos,
        clock.clone(),
    );
    Harness {
        dispatcher,
        chat,
        queue,
        conversations,
        clock,
    }
}

fn config() -> DispatcherConfig {
    DispatcherConfig {
        bot_user_id: "UBOT".to_string(),
        bot_id: "B01".to_string(),
        ..DispatcherConfig::default()
    }
}

fn message(user: &str, ts: &str) -> ChatEvent {
    ChatEvent {
        event_type: "message".to_string(),
        team_id: "T01".to_string(),
        channel_id: "C01".to_string(),
        user_id: user.to_string(),
        ts: ts.to_string(),
        text: "@bot build me a widget".to_string(),
        user_display_name: Some("Alice".to_string()),
        ..ChatEvent::default()
    }
}

#[tokio::test]
async fn admitted_message_is_enqueued() {
    let h = harness(config());
    let outcome = h.dispatcher.handle_event(&message("U01", "1727.200")).await.unwrap();

    let DispatchOutcome::Enqueued { session_key } = outcome else {
        panic!("expected enqueued, got {outcome:?}");
    };
    assert_eq!(session_key.as_str(), "slack-T01-C01-U01-1727.200");

    let payloads = h.queue.payloads(MESSAGES_QUEUE);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["userId"], "U01");
    assert_eq!(payloads[0]["threadId"], "1727.200");
    assert!(payloads[0].get("routingMetadata").is_none());

    // Placeholder was posted into the (new) thread
    assert!(matches!(
        &h.chat.calls()[0],
        ChatCall::Post { thread_ts: Some(ts), .. } if ts == "1727.200"
    ));

    let session = h.dispatcher.sessions().get(&session_key).unwrap();
    assert_eq!(session.status, peerbot_core::SessionStatus::Enqueued);
}

#[tokio::test]
async fn thread_reply_carries_routing_metadata() {
    let h = harness(config());
    let mut event = message("U01", "1727.300");
    event.thread_ts = Some("1727.100".to_string());

    let outcome = h.dispatcher.handle_event(&event).await.unwrap();
    let DispatchOutcome::Enqueued { session_key } = outcome else {
        panic!("expected enqueued");
    };
    assert_eq!(session_key.as_str(), "slack-T01-C01-U01-1727.100");

    let payloads = h.queue.payloads(MESSAGES_QUEUE);
    assert_eq!(payloads[0]["routingMetadata"]["targetThreadId"], "1727.100");
}

#[tokio::test]
async fn bot_messages_are_ignored() {
    let h = harness(config());

    let mut own = message("UBOT", "1.1");
    own.user_display_name = None;
    assert_eq!(
        h.dispatcher.handle_event(&own).await.unwrap(),
        DispatchOutcome::Ignored("bot message")
    );

    let mut other_bot = message("U01", "1.2");
    other_bot.bot_id = Some("B99".to_string());
    assert_eq!(
        h.dispatcher.handle_event(&other_bot).await.unwrap(),
        DispatchOutcome::Ignored("bot message")
    );

    assert!(h.queue.payloads(MESSAGES_QUEUE).is_empty());
    assert!(h.chat.calls().is_empty());
}

#[tokio::test]
async fn edits_and_deletes_are_ignored() {
    let h = harness(config());
    let mut event = message("U01", "1.1");
    event.subtype = Some("message_changed".to_string());

    assert_eq!(
        h.dispatcher.handle_event(&event).await.unwrap(),
        DispatchOutcome::Ignored("ignored subtype")
    );
    assert!(h.queue.payloads(MESSAGES_QUEUE).is_empty());
}

#[tokio::test]
async fn deny_list_blocks_user_with_notice() {
    let mut cfg = config();
    cfg.deny_list.insert("U01".to_string());
    let h = harness(cfg);

    let outcome = h.dispatcher.handle_event(&message("U01", "1.1")).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Denied);
    assert!(h.queue.payloads(MESSAGES_QUEUE).is_empty());
    assert_eq!(h.chat.calls().len(), 1);
}

#[tokio::test]
async fn allow_list_admits_only_members() {
    let mut cfg = config();
    cfg.allow_list.insert("U02".to_string());
    let h = harness(cfg);

    assert_eq!(
        h.dispatcher.handle_event(&message("U01", "1.1")).await.unwrap(),
        DispatchOutcome::Denied
    );
}

#[tokio::test]
async fn rate_limit_rejects_sixth_request() {
    let h = harness(config());

    for i in 0..5 {
        let outcome = h
            .dispatcher
            .handle_event(&message("U01", &format!("1727.{i}")))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Enqueued { .. }));
    }

    let outcome = h.dispatcher.handle_event(&message("U01", "1727.9")).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::RateLimited);

    // Five jobs, five placeholders, one rejection notice
    assert_eq!(h.queue.payloads(MESSAGES_QUEUE).len(), 5);
    assert_eq!(h.chat.calls().len(), 6);
    assert_eq!(h.dispatcher.rate_limiter().remaining("U01"), 0);
}

#[tokio::test]
async fn duplicate_event_is_deduplicated() {
    let h = harness(config());
    let event = message("U01", "1727.200");

    let first = h.dispatcher.handle_event(&event).await.unwrap();
    let second = h.dispatcher.handle_event(&event).await.unwrap();

    assert!(matches!(first, DispatchOutcome::Enqueued { .. }));
    assert!(matches!(second, DispatchOutcome::Duplicate { .. }));
    assert_eq!(h.queue.payloads(MESSAGES_QUEUE).len(), 1);
}

#[tokio::test]
async fn stored_agent_session_rides_into_options() {
    let h = harness(config());
    let key = SessionKey::from_raw("slack-T01-C01-U01-1727.100");
    let mut record = peerbot_store::ConversationRecord::new(key, "T01", "U01");
    record.agent_session_id = Some("agent-abc".to_string());
    h.conversations.upsert(&record).await.unwrap();

    let mut event = message("U01", "1727.300");
    event.thread_ts = Some("1727.100".to_string());
    h.dispatcher.handle_event(&event).await.unwrap();

    let payloads = h.queue.payloads(MESSAGES_QUEUE);
    assert_eq!(payloads[0]["agentSessionId"], "agent-abc");
    assert_eq!(payloads[0]["claudeOptions"]["resumeSessionId"], "agent-abc");
}

#[tokio::test]
async fn window_expiry_readmits_user() {
    let h = harness(config());
    for i in 0..5 {
        h.dispatcher
            .handle_event(&message("U01", &format!("1727.{i}")))
            .await
            .unwrap();
    }
    assert_eq!(
        h.dispatcher.handle_event(&message("U01", "1727.9")).await.unwrap(),
        DispatchOutcome::RateLimited
    );

    h.clock.advance(std::time::Duration::from_secs(15 * 60 + 1));
    let outcome = h.dispatcher.handle_event(&message("U01", "1800.1")).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Enqueued { .. }));
}
