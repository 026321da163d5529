// SPDX-License-Identifier: MIT

use super::*;
use proptest::prelude::*;

#[test]
fn threaded_message_keys_on_thread() {
    let key = SessionKey::derive("slack", "T01", "C01", "U01", Some("1727.100"), "1727.200");
    assert_eq!(key.as_str(), "slack-T01-C01-U01-1727.100");
}

#[test]
fn top_level_message_keys_on_its_own_ts() {
    let key = SessionKey::derive("slack", "T01", "C01", "U01", None, "1727.200");
    assert_eq!(key.as_str(), "slack-T01-C01-U01-1727.200");
}

#[test]
fn reply_reproduces_the_seeding_message_key() {
    // A top-level message seeds a thread under its own ts; replies carry
    // that ts as thread id and land on the same session.
    let seed = SessionKey::derive("slack", "T01", "C01", "U01", None, "1727.100");
    let reply = SessionKey::derive("slack", "T01", "C01", "U01", Some("1727.100"), "1727.300");
    assert_eq!(seed, reply);
}

#[test]
fn users_in_the_same_thread_are_isolated() {
    let alice = SessionKey::derive("slack", "T01", "C01", "U01", Some("1727.100"), "1727.200");
    let bob = SessionKey::derive("slack", "T01", "C01", "U99", Some("1727.100"), "1727.300");
    assert_ne!(alice, bob);
}

#[yare::parameterized(
    plain      = { "abc123", "abc123" },
    uppercase  = { "Slack-T01", "slack-t01" },
    dots       = { "slack-T01-C01-1727.100", "slack-t01-c01-1727-100" },
    squeezed   = { "a..b__c", "a-b-c" },
    trimmed    = { ".abc.", "abc" },
    unicode    = { "héllo", "h-llo" },
)]
fn safe_name_mapping(input: &str, expected: &str) {
    assert_eq!(safe_name(input), expected);
}

#[test]
fn safe_name_truncates_without_trailing_dash() {
    let long = format!("{}.x", "a".repeat(CLUSTER_NAME_MAX - 1));
    let safe = safe_name(&long);
    assert!(safe.len() <= CLUSTER_NAME_MAX);
    assert!(!safe.ends_with('-'));
}

#[test]
fn deployment_name_has_prefix() {
    let key = SessionKey::derive("slack", "T01", "C01", "U01", Some("1727.100"), "1727.200");
    assert_eq!(deployment_name(&key), "worker-slack-t01-c01-u01-1727-100");
}

#[test]
fn branch_name_replaces_dots() {
    let key = SessionKey::from_raw("slack-T01-C01-1727.100");
    assert_eq!(branch_name(&key), "claude/slack-T01-C01-1727-100");
}

#[test]
fn thread_queue_name_from_deployment() {
    assert_eq!(
        thread_queue_name("worker-slack-t01-c01-1727-100"),
        "thread_message_worker-slack-t01-c01-1727-100"
    );
}

proptest! {
    /// Name safety: any key yields a deployment name that is a valid
    /// DNS-1123 label of at most 63 characters.
    #[test]
    fn deployment_name_is_cluster_safe(raw in "[ -~]{0,60}[a-z0-9][ -~]{0,59}") {
        let key = SessionKey::from_raw(raw);
        let name = deployment_name(&key);
        prop_assert!(name.len() <= CLUSTER_NAME_MAX);
        let mut chars = name.chars();
        let first = chars.next().unwrap();
        prop_assert!(first.is_ascii_lowercase() || first.is_ascii_digit());
        prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!name.ends_with('-'));
    }

    /// Derivation is deterministic: identical coordinates, identical key.
    #[test]
    fn derivation_deterministic(
        ws in "[A-Z0-9]{1,12}",
        ch in "[A-Z0-9]{1,12}",
        user in "[A-Z0-9]{1,12}",
        msg in "[0-9]{4}\\.[0-9]{4}",
    ) {
        let a = SessionKey::derive("slack", &ws, &ch, &user, None, &msg);
        let b = SessionKey::derive("slack", &ws, &ch, &user, None, &msg);
        prop_assert_eq!(a, b);
    }
}
