// SPDX-License-Identifier: MIT

//! Subprocess implementation of [`AgentRunner`].
//!
//! Spawns the agent CLI with the prompt on argv and options as a JSON
//! argument, then reads NDJSON events off stdout line by line. The
//! process group dies with the run: timeout, cancellation and stream
//! termination all converge on `kill`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::AgentEvent;
use crate::runner::{AgentError, AgentOutcome, AgentRequest, AgentRunner};

/// Agent CLI subprocess runner.
#[derive(Debug, Clone)]
pub struct ProcessAgent {
    /// Binary to execute (e.g. `claude`).
    command: String,
    /// Auth token exported to the subprocess environment.
    token: Option<String>,
}

impl ProcessAgent {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Argument vector for one request. Split out for testing.
    pub(crate) fn build_args(request: &AgentRequest) -> Result<Vec<String>, AgentError> {
        let options_json = serde_json::to_string(&request.options)
            .map_err(|e| AgentError::Spawn(format!("options serialization: {e}")))?;

        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--options".to_string(),
            options_json,
        ];
        if let Some(resume) = &request.options.resume_session_id {
            args.push("--resume".to_string());
            args.push(resume.clone());
        }
        if !request.context.is_empty() {
            let context_json = serde_json::to_string(&request.context)
                .map_err(|e| AgentError::Spawn(format!("context serialization: {e}")))?;
            args.push("--context".to_string());
            args.push(context_json);
        }
        args.push(request.prompt.clone());
        Ok(args)
    }
}

/// Read events from stdout until a terminal event or EOF.
async fn pump_events(
    stdout: tokio::process::ChildStdout,
    events: &mpsc::Sender<AgentEvent>,
) -> (Option<String>, Option<String>, Option<String>) {
    let mut session_id = None;
    let mut final_text = None;
    let mut reported_error = None;
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(event) = AgentEvent::parse_line(&line) else {
            continue;
        };
        match &event {
            AgentEvent::Started { session_id: sid } => {
                session_id = Some(sid.clone());
            }
            AgentEvent::Result {
                text,
                session_id: sid,
            } => {
                final_text = Some(text.clone());
                if let Some(sid) = sid {
                    session_id = Some(sid.clone());
                }
            }
            AgentEvent::Error { message } => {
                reported_error = Some(message.clone());
            }
            AgentEvent::Output { .. } => {}
        }
        let terminal = event.is_terminal();
        if events.send(event).await.is_err() {
            break;
        }
        if terminal {
            break;
        }
    }

    (session_id, final_text, reported_error)
}

#[async_trait]
impl AgentRunner for ProcessAgent {
    async fn run(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        let args = Self::build_args(&request)?;
        let timeout_minutes = request.options.timeout_minutes;

        let mut command = Command::new(&self.command);
        command
            .args(&args)
            .current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &self.token {
            command.env("AGENT_TOKEN", token);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {e}", self.command)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("stderr not captured".to_string()))?;

        tracing::info!(command = %self.command, timeout_minutes, "agent spawned");

        let deadline = Duration::from_secs(u64::from(timeout_minutes) * 60);
        let pumped = tokio::select! {
            pumped = pump_events(stdout, &events) => pumped,
            _ = tokio::time::sleep(deadline) => {
                let _ = child.kill().await;
                return Err(AgentError::Timeout { minutes: timeout_minutes });
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(AgentError::Cancelled);
            }
        };

        enum WaitEnd {
            Exited(std::io::Result<std::process::ExitStatus>),
            Timeout,
            Cancelled,
        }
        let end = tokio::select! {
            status = child.wait() => WaitEnd::Exited(status),
            _ = tokio::time::sleep(deadline) => WaitEnd::Timeout,
            _ = cancel.cancelled() => WaitEnd::Cancelled,
        };
        let status = match end {
            WaitEnd::Exited(status) => {
                status.map_err(|e| AgentError::Spawn(format!("wait failed: {e}")))?
            }
            WaitEnd::Timeout => {
                let _ = child.kill().await;
                return Err(AgentError::Timeout { minutes: timeout_minutes });
            }
            WaitEnd::Cancelled => {
                let _ = child.kill().await;
                return Err(AgentError::Cancelled);
            }
        };

        let (session_id, final_text, reported_error) = pumped;

        if let Some(message) = reported_error {
            return Err(AgentError::Reported(message));
        }
        if !status.success() {
            let mut stderr_buf = String::new();
            let _ = stderr.read_to_string(&mut stderr_buf).await;
            let tail: String = stderr_buf
                .lines()
                .rev()
                .take(10)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AgentError::Exited {
                code: status.code(),
                stderr: tail,
            });
        }

        Ok(AgentOutcome {
            session_id,
            final_text: final_text.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
