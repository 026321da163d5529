// SPDX-License-Identifier: MIT

use super::*;
use peerbot_core::FakeClock;

fn session(key: &str, clock: &FakeClock) -> ThreadSession {
    ThreadSession::new(
        SessionKey::from_raw(key),
        "C01",
        "U01",
        "user-alice",
        "https://github.com/org/alice-workspace",
        clock.epoch_ms(),
    )
}

#[test]
fn upsert_and_get() {
    let clock = FakeClock::new();
    let registry = SessionRegistry::new(clock.clone());
    registry.upsert(session("slack-T01-C01-1.1", &clock));

    let found = registry.get(&SessionKey::from_raw("slack-T01-C01-1.1")).unwrap();
    assert_eq!(found.status, SessionStatus::Pending);
}

#[test]
fn advance_updates_status_and_activity() {
    let clock = FakeClock::new();
    let registry = SessionRegistry::new(clock.clone());
    registry.upsert(session("slack-T01-C01-1.1", &clock));

    clock.advance(std::time::Duration::from_secs(10));
    let key = SessionKey::from_raw("slack-T01-C01-1.1");
    registry.advance(&key, SessionStatus::Enqueued);

    let found = registry.get(&key).unwrap();
    assert_eq!(found.status, SessionStatus::Enqueued);
    assert!(found.last_activity_ms > found.created_at_ms);
}

#[test]
fn prune_drops_only_terminal() {
    let clock = FakeClock::new();
    let registry = SessionRegistry::new(clock.clone());
    registry.upsert(session("slack-T01-C01-1.1", &clock));
    registry.upsert(session("slack-T01-C01-2.2", &clock));

    registry.advance(
        &SessionKey::from_raw("slack-T01-C01-1.1"),
        SessionStatus::Completed,
    );

    assert_eq!(registry.prune_terminal(), 1);
    assert_eq!(registry.len(), 1);
    assert!(registry.get(&SessionKey::from_raw("slack-T01-C01-2.2")).is_some());
}
