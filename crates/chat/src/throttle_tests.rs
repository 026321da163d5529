// SPDX-License-Identifier: MIT

use super::*;
use crate::fake::FakeChatClient;

fn throttle(chat: &FakeChatClient) -> UpdateThrottle<FakeChatClient> {
    UpdateThrottle::with_interval(Arc::new(chat.clone()), Duration::from_secs(2))
}

#[tokio::test(start_paused = true)]
async fn first_update_sends_immediately() {
    let chat = FakeChatClient::new();
    let t = throttle(&chat);

    t.offer("C01", "1.1", "hello").await.unwrap();
    assert_eq!(chat.last_update("1.1").as_deref(), Some("hello"));
    assert_eq!(chat.update_count("1.1"), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_to_latest() {
    let chat = FakeChatClient::new();
    let t = throttle(&chat);

    t.offer("C01", "1.1", "v1").await.unwrap();
    t.offer("C01", "1.1", "v2").await.unwrap();
    t.offer("C01", "1.1", "v3").await.unwrap();

    // Only v1 went out so far
    assert_eq!(chat.update_count("1.1"), 1);

    // After the window the flusher sends only the most recent content
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(chat.update_count("1.1"), 2);
    assert_eq!(chat.last_update("1.1").as_deref(), Some("v3"));
}

#[tokio::test(start_paused = true)]
async fn spaced_updates_all_send() {
    let chat = FakeChatClient::new();
    let t = throttle(&chat);

    t.offer("C01", "1.1", "v1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    t.offer("C01", "1.1", "v2").await.unwrap();

    assert_eq!(chat.update_count("1.1"), 2);
}

#[tokio::test(start_paused = true)]
async fn messages_are_throttled_independently() {
    let chat = FakeChatClient::new();
    let t = throttle(&chat);

    t.offer("C01", "1.1", "a").await.unwrap();
    t.offer("C01", "2.2", "b").await.unwrap();

    assert_eq!(chat.update_count("1.1"), 1);
    assert_eq!(chat.update_count("2.2"), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_drains_pending_immediately() {
    let chat = FakeChatClient::new();
    let t = throttle(&chat);

    t.offer("C01", "1.1", "v1").await.unwrap();
    t.offer("C01", "1.1", "v2").await.unwrap();
    t.flush("C01", "1.1").await.unwrap();

    assert_eq!(chat.last_update("1.1").as_deref(), Some("v2"));
}
