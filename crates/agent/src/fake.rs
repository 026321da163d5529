// SPDX-License-Identifier: MIT

//! Scripted agent for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::AgentEvent;
use crate::runner::{AgentError, AgentOutcome, AgentRequest, AgentRunner};

/// What a scripted run should do.
#[derive(Debug, Clone)]
pub enum FakeRun {
    /// Emit the events, then succeed with the outcome.
    Succeed {
        events: Vec<AgentEvent>,
        outcome: AgentOutcome,
    },
    /// Emit the events, then fail.
    Fail {
        events: Vec<AgentEvent>,
        message: String,
    },
}

#[derive(Default)]
struct FakeState {
    script: Vec<FakeRun>,
    requests: Vec<AgentRequest>,
}

/// Agent runner that replays scripted runs and records requests.
#[derive(Clone, Default)]
pub struct FakeAgent {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: a single successful run assigning `session_id` and
    /// finishing with `final_text`.
    pub fn succeeding(session_id: &str, final_text: &str) -> Self {
        let agent = Self::new();
        agent.push_run(FakeRun::Succeed {
            events: vec![
                AgentEvent::Started {
                    session_id: session_id.to_string(),
                },
                AgentEvent::Output {
                    text: "working on it".to_string(),
                    task_list: None,
                },
                AgentEvent::Result {
                    text: final_text.to_string(),
                    session_id: Some(session_id.to_string()),
                },
            ],
            outcome: AgentOutcome {
                session_id: Some(session_id.to_string()),
                final_text: final_text.to_string(),
            },
        });
        agent
    }

    pub fn failing(message: &str) -> Self {
        let agent = Self::new();
        agent.push_run(FakeRun::Fail {
            events: vec![AgentEvent::Error {
                message: message.to_string(),
            }],
            message: message.to_string(),
        });
        agent
    }

    /// Queue another scripted run (consumed in order; the last one
    /// repeats).
    pub fn push_run(&self, run: FakeRun) {
        self.state.lock().script.push(run);
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.state.lock().requests.clone()
    }

    /// Resume id passed on invocation `index`.
    pub fn resume_id(&self, index: usize) -> Option<String> {
        self.state
            .lock()
            .requests
            .get(index)
            .and_then(|r| r.options.resume_session_id.clone())
    }
}

#[async_trait]
impl AgentRunner for FakeAgent {
    async fn run(
        &self,
        request: AgentRequest,
        events: mpsc::Sender<AgentEvent>,
        _cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        let run = {
            let mut state = self.state.lock();
            state.requests.push(request);
            let call = state.requests.len() - 1;
            match state.script.get(call).or_else(|| state.script.last()) {
                Some(run) => run.clone(),
                None => FakeRun::Succeed {
                    events: Vec::new(),
                    outcome: AgentOutcome {
                        session_id: None,
                        final_text: String::new(),
                    },
                },
            }
        };

        match run {
            FakeRun::Succeed {
                events: scripted,
                outcome,
            } => {
                for event in scripted {
                    let _ = events.send(event).await;
                }
                Ok(outcome)
            }
            FakeRun::Fail {
                events: scripted,
                message,
            } => {
                for event in scripted {
                    let _ = events.send(event).await;
                }
                Err(AgentError::Reported(message))
            }
        }
    }
}
