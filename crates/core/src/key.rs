// SPDX-License-Identifier: MIT

//! Session-key derivation and safe cluster names.
//!
//! A [`SessionKey`] is the correlation id for one conversation thread. It is
//! derived deterministically from platform coordinates and flows through
//! queue payloads, deployment labels, git branch names and chat updates.
//! Everything that has to agree across process restarts agrees because it
//! is re-derived from the same coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kubernetes object name limit (DNS-1123 label).
pub const CLUSTER_NAME_MAX: usize = 63;

/// Prefix for worker deployment names.
const DEPLOYMENT_PREFIX: &str = "worker-";

/// Prefix for session branches pushed by workers.
const BRANCH_PREFIX: &str = "claude/";

/// Prefix for per-thread queues.
const THREAD_QUEUE_PREFIX: &str = "thread_message_";

/// Stable identifier for a single conversation thread (per user).
///
/// Derivation rule: a message inside a thread keys on the thread id, so
/// every reply maps to the thread's session. A top-level message seeds
/// its own thread — its message id becomes the thread id for all replies
/// — so both cases reduce to `(platform, workspace, channel, user,
/// thread-or-message)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Derive the key for a platform event.
    pub fn derive(
        platform: &str,
        workspace_id: &str,
        channel_id: &str,
        user_id: &str,
        thread_id: Option<&str>,
        message_id: &str,
    ) -> Self {
        let thread = thread_id.unwrap_or(message_id);
        Self(format!(
            "{platform}-{workspace_id}-{channel_id}-{user_id}-{thread}"
        ))
    }

    /// Wrap an already-derived key (queue payloads carry keys as strings).
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cluster-safe form of this key (label values, object names).
    pub fn safe(&self) -> String {
        safe_name(&self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for SessionKey {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl std::borrow::Borrow<str> for SessionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Make a string safe for cluster object names and label values.
///
/// Lowercases, maps every character outside `[a-z0-9]` to `-`, squeezes
/// runs of dashes, trims leading/trailing dashes, and truncates to the
/// object name limit. The result always matches `^[a-z0-9][a-z0-9-]*$`
/// (or is empty, for input with no usable characters).
pub fn safe_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true; // suppress leading dashes
    for c in raw.chars() {
        let mapped = match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => Some(c),
            _ => None,
        };
        match mapped {
            Some(c) => {
                out.push(c);
                last_dash = false;
            }
            None if last_dash => {}
            None => {
                out.push('-');
                last_dash = true;
            }
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(CLUSTER_NAME_MAX);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Deployment name for a session: `worker-<safe(key)>`, ≤ 63 chars.
pub fn deployment_name(key: &SessionKey) -> String {
    let max_len = CLUSTER_NAME_MAX - DEPLOYMENT_PREFIX.len();
    let mut safe = key.safe();
    safe.truncate(max_len);
    while safe.ends_with('-') {
        safe.pop();
    }
    format!("{DEPLOYMENT_PREFIX}{safe}")
}

/// Session branch name: `claude/<key with '.' → '-'>`.
pub fn branch_name(key: &SessionKey) -> String {
    format!("{BRANCH_PREFIX}{}", key.as_str().replace('.', "-"))
}

/// Per-thread queue name for a deployment.
pub fn thread_queue_name(deployment: &str) -> String {
    format!("{THREAD_QUEUE_PREFIX}{deployment}")
}

#[cfg(test)]
#[path = "key_tests.rs"]
mod tests;
