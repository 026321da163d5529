// SPDX-License-Identifier: MIT

//! Git workspace management.
//!
//! The workspace directory is `<base>/<username>`, a clone of the user's
//! repository. The worker owns it exclusively: one worker per session
//! branch, so there is no cross-process contention to guard against.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Workspace operation errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem/git boundary for the worker.
#[async_trait]
pub trait Workspace: Send + Sync + 'static {
    /// Directory the agent runs in.
    fn root(&self) -> PathBuf;

    /// Make the workspace a fresh-enough clone on the session branch.
    async fn prepare(&self, branch: &str) -> Result<(), WorkspaceError>;

    /// Number of changed files in the working tree.
    async fn changed_files(&self) -> Result<usize, WorkspaceError>;

    /// Commit everything and push the session branch. Returns false when
    /// there was nothing to commit.
    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<bool, WorkspaceError>;
}

/// Insert an access token into an HTTPS remote URL.
pub fn authenticated_url(repository_url: &str, token: &str) -> String {
    match repository_url.strip_prefix("https://") {
        Some(rest) => format!("https://x-access-token:{token}@{rest}"),
        None => repository_url.to_string(),
    }
}

/// Commit message for the periodic checkpoint; encodes the file count.
pub fn checkpoint_message(changed: usize) -> String {
    format!("Checkpoint: {changed} file(s) changed")
}

/// Real git workspace driven through the `git` CLI.
pub struct GitWorkspace {
    dir: PathBuf,
    repository_url: String,
    token: String,
    username: String,
}

impl GitWorkspace {
    pub fn new(
        base_dir: &Path,
        username: impl Into<String>,
        repository_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            dir: base_dir.join(&username),
            repository_url: repository_url.into(),
            token: token.into(),
            username,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn git(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(WorkspaceError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git where failure is a boolean, not an error.
    async fn git_ok(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn clone_fresh(&self) -> Result<(), WorkspaceError> {
        if self.dir.exists() {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        if let Some(parent) = self.dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = authenticated_url(&self.repository_url, &self.token);
        let output = Command::new("git")
            .args(["clone", &url])
            .arg(&self.dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(WorkspaceError::Git {
                command: "clone".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// True when the existing checkout points at our repository.
    async fn is_our_clone(&self) -> bool {
        if !self.dir.join(".git").exists() {
            return false;
        }
        let origin = Command::new("git")
            .args(["remote", "get-url", "origin"])
            .current_dir(&self.dir)
            .output()
            .await
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap_or_default();
        // Tokens rotate; compare ignoring credentials
        strip_credentials(&origin) == strip_credentials(&self.repository_url)
    }
}

/// Drop the userinfo part of an HTTPS URL for comparison.
fn strip_credentials(url: &str) -> String {
    match url.strip_prefix("https://").and_then(|rest| {
        rest.split_once('@')
            .map(|(_, host)| format!("https://{host}"))
    }) {
        Some(stripped) => stripped,
        None => url.to_string(),
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    fn root(&self) -> PathBuf {
        self.dir.clone()
    }

    async fn prepare(&self, branch: &str) -> Result<(), WorkspaceError> {
        if self.is_our_clone().await {
            self.git(&["fetch", "origin"]).await?;
        } else {
            self.clone_fresh().await?;
        }

        // Bot identity derived from the user the workspace belongs to
        self.git(&["config", "user.name", &format!("{}[bot]", self.username)])
            .await?;
        self.git(&[
            "config",
            "user.email",
            &format!("{}@users.noreply.github.com", self.username),
        ])
        .await?;

        // Local branch, then remote tracking branch, then fresh branch
        if self
            .git_ok(&["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .await
        {
            self.git(&["checkout", branch]).await?;
        } else if self
            .git_ok(&[
                "show-ref",
                "--verify",
                &format!("refs/remotes/origin/{branch}"),
            ])
            .await
        {
            self.git(&["checkout", "-b", branch, &format!("origin/{branch}")])
                .await?;
        } else {
            self.git(&["checkout", "-b", branch]).await?;
        }
        tracing::info!(branch, dir = %self.dir.display(), "workspace ready");
        Ok(())
    }

    async fn changed_files(&self) -> Result<usize, WorkspaceError> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(status.lines().filter(|l| !l.trim().is_empty()).count())
    }

    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<bool, WorkspaceError> {
        let changed = self.changed_files().await?;
        if changed == 0 {
            return Ok(false);
        }
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "-m", message]).await?;
        self.git(&["push", "-u", "origin", branch]).await?;
        tracing::info!(branch, changed, "pushed checkpoint");
        Ok(true)
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
