// SPDX-License-Identifier: MIT

//! Per-user secret layout.

use std::collections::BTreeMap;

use peerbot_core::safe_name;

/// One secret per user: `peerbot-user-secret-<safe(username)>`.
pub fn user_secret_name(username: &str) -> String {
    format!("peerbot-user-secret-{}", safe_name(username))
}

/// Keys stored in the per-user secret.
///
/// `database_url` is the connection string the worker mounts; the role
/// and password ride alongside for rotation.
pub fn user_secret_keys(
    db_username: &str,
    db_password: &str,
    database_url: &str,
) -> BTreeMap<String, String> {
    [
        ("DATABASE_URL".to_string(), database_url.to_string()),
        ("DB_USERNAME".to_string(), db_username.to_string()),
        ("DB_PASSWORD".to_string(), db_password.to_string()),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_name_is_cluster_safe() {
        assert_eq!(
            user_secret_name("User_Alice"),
            "peerbot-user-secret-user-alice"
        );
    }

    #[test]
    fn secret_keys_layout() {
        let keys = user_secret_keys("peerbot_user_u01", "pw", "postgres://u:pw@db/peerbot");
        assert_eq!(keys.len(), 3);
        assert_eq!(keys["DB_USERNAME"], "peerbot_user_u01");
        assert!(keys["DATABASE_URL"].starts_with("postgres://"));
    }
}
