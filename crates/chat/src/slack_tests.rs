// SPDX-License-Identifier: MIT

use super::*;

#[yare::parameterized(
    message_gone  = { "message_not_found", true },
    channel_gone  = { "channel_not_found", true },
    not_in        = { "not_in_channel", true },
    invalid_auth  = { "invalid_auth", false },
    fatal_error   = { "fatal_error", false },
)]
fn error_mapping_permanence(slack_error: &str, permanent: bool) {
    let err = map_api_error(slack_error);
    assert_eq!(err.is_permanent(), permanent);
}

#[test]
fn named_errors_map_to_variants() {
    assert!(matches!(
        map_api_error("message_not_found"),
        ChatError::MessageNotFound
    ));
    assert!(matches!(
        map_api_error("channel_not_found"),
        ChatError::ChannelNotFound
    ));
    assert!(matches!(map_api_error("not_in_channel"), ChatError::NotInChannel));
    assert!(matches!(map_api_error("ratelimited"), ChatError::Api(_)));
}

#[test]
fn rate_limited_is_not_permanent() {
    let err = ChatError::RateLimited { retry_after_secs: 3 };
    assert!(!err.is_permanent());
}
