// SPDX-License-Identifier: MIT

use super::*;
use crate::test_support::request;

#[test]
fn request_serializes_camel_case() {
    let req = request("U01", "1727.100");
    let json = serde_json::to_value(&req).unwrap();

    assert_eq!(json["userId"], "U01");
    assert_eq!(json["messageText"], "build me a widget");
    assert_eq!(json["platformMetadata"]["teamId"], "T01");
    assert_eq!(json["claudeOptions"]["timeoutMinutes"], 30);
    // Absent options stay off the wire entirely
    assert!(json["claudeOptions"].get("resumeSessionId").is_none());
    assert!(json.get("routingMetadata").is_none());
}

#[test]
fn request_round_trips_through_json() {
    let mut req = request("U01", "1727.100");
    req.agent_session_id = Some("agent-abc".to_string());
    req.routing_metadata = Some(RoutingMetadata {
        target_thread_id: "1727.100".to_string(),
        agent_session_id: Some("agent-abc".to_string()),
        user_id: "U01".to_string(),
    });

    let json = serde_json::to_string(&req).unwrap();
    let parsed: WorkerDeploymentRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, req);
}

#[test]
fn session_key_from_request_uses_thread() {
    let req = request("U01", "1727.100");
    assert_eq!(req.session_key().as_str(), "slack-T01-C01-U01-1727.100");
}

#[yare::parameterized(
    user    = { |r: &mut WorkerDeploymentRequest| r.user_id.clear(), "userId" },
    thread  = { |r: &mut WorkerDeploymentRequest| r.thread_id.clear(), "threadId" },
    channel = { |r: &mut WorkerDeploymentRequest| r.channel_id.clear(), "channelId" },
    repo    = { |r: &mut WorkerDeploymentRequest| r.platform_metadata.repository_url.clear(), "repositoryUrl" },
)]
fn validation_rejects_missing_fields(clear: fn(&mut WorkerDeploymentRequest), field: &str) {
    let mut req = request("U01", "1727.100");
    clear(&mut req);
    assert_eq!(req.validate(), Err(ValidationError::MissingField(field)));
}

#[test]
fn validation_accepts_complete_request() {
    assert_eq!(request("U01", "1727.100").validate(), Ok(()));
}

#[test]
fn thread_response_round_trips() {
    let resp = ThreadResponse {
        message_id: "m-1".to_string(),
        channel_id: "C01".to_string(),
        thread_ts: "1727.100".to_string(),
        user_id: "U01".to_string(),
        content: Some("done".to_string()),
        is_done: true,
        reaction: Some(ReactionKind::Success),
        error: None,
        timestamp: 1_727_000_000,
        original_message_ts: Some("1727.050".to_string()),
    };

    let json = serde_json::to_string(&resp).unwrap();
    assert!(json.contains("\"isDone\":true"));
    assert!(json.contains("\"reaction\":\"success\""));

    let parsed: ThreadResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, resp);
}
