// SPDX-License-Identifier: MIT

use super::*;

fn event() -> ChatEvent {
    ChatEvent {
        event_type: "message".to_string(),
        team_id: "T01".to_string(),
        channel_id: "C01".to_string(),
        user_id: "U01".to_string(),
        ts: "1727.200".to_string(),
        text: "@bot build me a widget".to_string(),
        ..ChatEvent::default()
    }
}

#[test]
fn own_messages_are_bot_messages() {
    let mut e = event();
    e.user_id = "UBOT".to_string();
    assert!(e.is_from_bot("UBOT", "B01"));
}

#[test]
fn bot_id_marks_bot_messages() {
    let mut e = event();
    e.bot_id = Some("B99".to_string());
    assert!(e.is_from_bot("UBOT", "B01"));
}

#[test]
fn human_messages_pass() {
    assert!(!event().is_from_bot("UBOT", "B01"));
}

#[yare::parameterized(
    edit      = { "message_changed", true },
    delete    = { "message_deleted", true },
    join      = { "channel_join", true },
    leave     = { "channel_leave", true },
    broadcast = { "thread_broadcast", true },
    file      = { "file_share", false },
)]
fn subtype_filtering(subtype: &str, ignored: bool) {
    let mut e = event();
    e.subtype = Some(subtype.to_string());
    assert_eq!(e.is_ignored_subtype(), ignored);
}

#[test]
fn no_subtype_is_not_ignored() {
    assert!(!event().is_ignored_subtype());
}

#[test]
fn missing_channel_fails_validation() {
    let mut e = event();
    e.channel_id.clear();
    assert!(!e.has_required_fields());
}

#[test]
fn thread_id_prefers_thread_ts() {
    let mut e = event();
    assert_eq!(e.thread_id(), "1727.200");
    e.thread_ts = Some("1727.100".to_string());
    assert_eq!(e.thread_id(), "1727.100");
}

#[test]
fn event_parses_from_connector_json() {
    let json = r#"{
        "eventType": "message",
        "teamId": "T01",
        "channelId": "C01",
        "userId": "U01",
        "ts": "1727.200",
        "threadTs": "1727.100",
        "text": "hello"
    }"#;
    let e: ChatEvent = serde_json::from_str(json).unwrap();
    assert_eq!(e.thread_id(), "1727.100");
    assert!(e.has_required_fields());
}
