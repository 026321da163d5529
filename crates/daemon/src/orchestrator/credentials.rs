// SPDX-License-Identifier: MIT

//! Per-user credential provisioning.
//!
//! A user's first deployment lazily creates a database role and a cluster
//! secret holding the matching connection string. The two must exist
//! together: a secret write failure rolls the role back, and concurrent
//! ensures serialize on a miss so exactly one password wins.

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use peerbot_cluster::{user_secret_keys, user_secret_name, ClusterApi, ClusterError};
use peerbot_store::{DbRoles, RoleError};

const PASSWORD_LEN: usize = 32;

/// Provisioned credentials for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub db_role: String,
    pub password: String,
    pub secret_name: String,
}

/// Credential provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error(transparent)]
    Role(#[from] RoleError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl CredentialError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CredentialError::Role(_) => true,
            CredentialError::Cluster(e) => e.is_retryable(),
        }
    }
}

/// Cache-first credential store over DB roles and cluster secrets.
pub struct CredentialStore<R: DbRoles, A: ClusterApi> {
    roles: R,
    cluster: A,
    /// `{user}` / `{password}` template for per-user connection strings.
    database_url_template: String,
    cache: Mutex<HashMap<String, UserCredentials>>,
    /// Serializes the miss path; reads stay lock-free past the cache.
    ensure_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<R: DbRoles, A: ClusterApi> CredentialStore<R, A> {
    pub fn new(roles: R, cluster: A, database_url_template: impl Into<String>) -> Self {
        Self {
            roles,
            cluster,
            database_url_template: database_url_template.into(),
            cache: Mutex::new(HashMap::new()),
            ensure_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn database_url(&self, role: &str, password: &str) -> String {
        self.database_url_template
            .replace("{user}", role)
            .replace("{password}", password)
    }

    fn generate_password() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LEN)
            .map(char::from)
            .collect()
    }

    /// Idempotent: returns existing credentials from cache or cluster
    /// secret, creating role and secret only on first use.
    pub async fn ensure_user_credentials(
        &self,
        user_id: &str,
        username: &str,
    ) -> Result<UserCredentials, CredentialError> {
        if let Some(found) = self.cache.lock().get(user_id) {
            return Ok(found.clone());
        }

        let _guard = self.ensure_lock.lock().await;
        // Another ensure may have finished while we waited
        if let Some(found) = self.cache.lock().get(user_id) {
            return Ok(found.clone());
        }

        let secret_name = user_secret_name(username);
        if let Some(existing) = self.cluster.get_secret(&secret_name).await? {
            if let (Some(role), Some(password)) =
                (existing.get("DB_USERNAME"), existing.get("DB_PASSWORD"))
            {
                let creds = UserCredentials {
                    db_role: role.clone(),
                    password: password.clone(),
                    secret_name,
                };
                self.cache.lock().insert(user_id.to_string(), creds.clone());
                return Ok(creds);
            }
        }

        let password = Self::generate_password();
        let role = self.roles.create_user_role(user_id, &password).await?;
        let database_url = self.database_url(&role, &password);

        let entries: BTreeMap<String, String> =
            user_secret_keys(&role, &password, &database_url);
        if let Err(e) = self.cluster.apply_secret_keys(&secret_name, entries).await {
            tracing::warn!(user_id, error = %e, "secret write failed, rolling back role");
            if let Err(rollback) = self.roles.drop_user_role(user_id).await {
                tracing::warn!(user_id, error = %rollback, "role rollback failed");
            }
            return Err(e.into());
        }

        let creds = UserCredentials {
            db_role: role,
            password,
            secret_name,
        };
        self.cache.lock().insert(user_id.to_string(), creds.clone());
        tracing::info!(user_id, "provisioned user credentials");
        Ok(creds)
    }

    /// Re-key the role and patch the secret in place.
    pub async fn rotate_user_credentials(
        &self,
        user_id: &str,
        username: &str,
    ) -> Result<UserCredentials, CredentialError> {
        let current = self.ensure_user_credentials(user_id, username).await?;
        let password = Self::generate_password();
        self.roles.alter_role_password(user_id, &password).await?;

        let database_url = self.database_url(&current.db_role, &password);
        let entries = user_secret_keys(&current.db_role, &password, &database_url);
        self.cluster
            .apply_secret_keys(&current.secret_name, entries)
            .await?;

        let creds = UserCredentials {
            password,
            ..current
        };
        self.cache.lock().insert(user_id.to_string(), creds.clone());
        tracing::info!(user_id, "rotated user credentials");
        Ok(creds)
    }

    /// Drop the role, delete the secret, evict the cache.
    pub async fn delete_user_credentials(
        &self,
        user_id: &str,
        username: &str,
    ) -> Result<(), CredentialError> {
        self.roles.drop_user_role(user_id).await?;
        self.cluster
            .delete_secret(&user_secret_name(username))
            .await?;
        self.cache.lock().remove(user_id);
        tracing::info!(user_id, "deleted user credentials");
        Ok(())
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
