// SPDX-License-Identifier: MIT

//! GitHub username resolution.
//!
//! Display names come from the platform in whatever shape users typed
//! them; repository names need a normalized, collision-safe form. The
//! `user-` prefix keeps generated names from shadowing real accounts.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Normalize a display name into a hosting username.
///
/// Lowercase, map everything outside `[a-z0-9-]` to `-`, collapse dash
/// runs, trim, and prefix with `user-`.
pub fn normalize_username(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    format!("user-{out}")
}

/// Cache of platform user id → normalized username.
#[derive(Default)]
pub struct UsernameCache {
    map: Mutex<HashMap<String, String>>,
}

impl UsernameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached username, or normalize `fallback` and remember it.
    pub fn resolve(&self, platform_user_id: &str, fallback: &str) -> String {
        let mut map = self.map.lock();
        if let Some(found) = map.get(platform_user_id) {
            return found.clone();
        }
        let username = normalize_username(fallback);
        map.insert(platform_user_id.to_string(), username.clone());
        username
    }
}

#[cfg(test)]
#[path = "usernames_tests.rs"]
mod tests;
