// SPDX-License-Identifier: MIT

use super::*;
use serial_test::serial;

fn set_all() {
    std::env::set_var("SESSION_KEY", "slack-T01-C01-U01-1727.100");
    std::env::set_var("USER_ID", "U01");
    std::env::set_var("USERNAME", "user-alice");
    std::env::set_var("CHANNEL_ID", "C01");
    std::env::set_var("REPOSITORY_URL", "https://github.com/org/alice-workspace");
    std::env::set_var("DEPLOYMENT_NAME", "worker-slack-t01-c01-u01-1727-100");
    std::env::set_var("DATABASE_URL", "postgres://u:p@db/peerbot");
    std::env::set_var("HOSTING_TOKEN", "ghs_token");
    std::env::set_var("AGENT_TOKEN", "agent_token");
}

fn clear_all() {
    for name in [
        "SESSION_KEY",
        "USER_ID",
        "USERNAME",
        "CHANNEL_ID",
        "THREAD_TS",
        "REPOSITORY_URL",
        "DEPLOYMENT_NAME",
        "DATABASE_URL",
        "HOSTING_TOKEN",
        "AGENT_TOKEN",
        "EXIT_ON_IDLE_MINUTES",
        "WORKSPACE_PATH",
    ] {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn loads_complete_environment() {
    clear_all();
    set_all();
    std::env::set_var("THREAD_TS", "1727.100");
    std::env::set_var("EXIT_ON_IDLE_MINUTES", "7");
    std::env::set_var("WORKSPACE_PATH", "/srv/workspace");

    let config = WorkerConfig::from_env().unwrap();
    assert_eq!(config.session_key.as_str(), "slack-T01-C01-U01-1727.100");
    assert_eq!(config.thread_ts.as_deref(), Some("1727.100"));
    assert_eq!(config.exit_on_idle, Duration::from_secs(7 * 60));
    assert_eq!(config.workspace_path, PathBuf::from("/srv/workspace"));
    clear_all();
}

#[test]
#[serial]
fn defaults_apply_when_optional_vars_missing() {
    clear_all();
    set_all();

    let config = WorkerConfig::from_env().unwrap();
    assert!(config.thread_ts.is_none());
    assert_eq!(config.exit_on_idle, Duration::from_secs(10 * 60));
    assert_eq!(config.workspace_path, PathBuf::from("/workspace"));
    clear_all();
}

#[test]
#[serial]
fn missing_session_key_is_fatal() {
    clear_all();
    set_all();
    std::env::remove_var("SESSION_KEY");

    let err = WorkerConfig::from_env().unwrap_err();
    assert!(matches!(err, WorkerConfigError::Missing(name) if name == "SESSION_KEY"));
    clear_all();
}

#[test]
#[serial]
fn derived_names_follow_session_key() {
    clear_all();
    set_all();

    let config = WorkerConfig::from_env().unwrap();
    assert_eq!(
        config.thread_queue(),
        "thread_message_worker-slack-t01-c01-u01-1727-100"
    );
    assert_eq!(config.branch(), "claude/slack-T01-C01-U01-1727-100");
    clear_all();
}
