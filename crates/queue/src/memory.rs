// SPDX-License-Identifier: MIT

//! In-memory queue for tests.
//!
//! Mirrors [`crate::PgQueue`] semantics — singleton dedup, priority order,
//! retry policy, team concurrency — without a database. The poll interval
//! defaults to a few milliseconds so `tokio::test` suites converge fast.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use peerbot_core::{Clock, SystemClock};

use crate::job::{JobError, JobId, JobState, QueueJob, QueueSize, SendOptions, WorkOptions};
use crate::queue::{JobHandler, Queue, QueueError, WorkHandle};

struct StoredJob {
    job: QueueJob,
    retry_delay: Duration,
    expire_at_ms: u64,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Vec<StoredJob>>,
}

/// In-process queue with the same contract as the Postgres implementation.
#[derive(Clone)]
pub struct MemoryQueue<C: Clock = SystemClock> {
    state: Arc<Mutex<State>>,
    clock: C,
    poll_interval: Duration,
}

impl MemoryQueue<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryQueue<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryQueue<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Snapshot of job states for assertions.
    pub fn job_states(&self, name: &str) -> Vec<JobState> {
        let state = self.state.lock();
        state
            .queues
            .get(name)
            .map(|jobs| jobs.iter().map(|s| s.job.state).collect())
            .unwrap_or_default()
    }

    /// All payloads ever sent to a queue, in arrival order.
    pub fn payloads(&self, name: &str) -> Vec<serde_json::Value> {
        let state = self.state.lock();
        state
            .queues
            .get(name)
            .map(|jobs| jobs.iter().map(|s| s.job.data.clone()).collect())
            .unwrap_or_default()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn claim(&self, name: &str, limit: usize) -> Vec<QueueJob> {
        let now_ms = self.clock.epoch_ms();
        let mut state = self.state.lock();
        let Some(jobs) = state.queues.get_mut(name) else {
            return Vec::new();
        };

        let mut due: Vec<&mut StoredJob> = jobs
            .iter_mut()
            .filter(|s| {
                matches!(s.job.state, JobState::Created | JobState::Retry)
                    && s.job.start_after_ms <= now_ms
            })
            .collect();
        due.sort_by(|a, b| {
            b.job
                .priority
                .cmp(&a.job.priority)
                .then(a.job.created_at_ms.cmp(&b.job.created_at_ms))
        });

        due.into_iter()
            .take(limit)
            .map(|s| {
                s.job.state = JobState::Active;
                s.job.clone()
            })
            .collect()
    }

    fn settle(&self, id: JobId, outcome: Result<(), JobError>) {
        let now_ms = self.clock.epoch_ms();
        let mut state = self.state.lock();
        for jobs in state.queues.values_mut() {
            if let Some(stored) = jobs.iter_mut().find(|s| s.job.id == id) {
                match &outcome {
                    Ok(()) => stored.job.state = JobState::Completed,
                    Err(JobError::Fail(_)) => stored.job.state = JobState::Failed,
                    Err(JobError::Retry(_)) => {
                        if stored.job.retry_count < stored.job.retry_limit {
                            stored.job.retry_count += 1;
                            stored.job.state = JobState::Retry;
                            stored.job.start_after_ms =
                                now_ms + stored.retry_delay.as_millis() as u64;
                        } else {
                            stored.job.state = JobState::Failed;
                        }
                    }
                }
                return;
            }
        }
    }
}

#[async_trait]
impl<C: Clock> Queue for MemoryQueue<C> {
    async fn create_queue(&self, name: &str) -> Result<(), QueueError> {
        self.state.lock().queues.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.state.lock().queues.remove(name);
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.queue_names())
    }

    async fn send(
        &self,
        name: &str,
        payload: serde_json::Value,
        opts: SendOptions,
    ) -> Result<Option<JobId>, QueueError> {
        let now_ms = self.clock.epoch_ms();
        let mut state = self.state.lock();
        let jobs = state.queues.entry(name.to_string()).or_default();

        if let Some(key) = &opts.singleton_key {
            // Dedup window = expiry: expired rows release their key
            let duplicate = jobs
                .iter()
                .any(|s| s.job.singleton_key.as_deref() == Some(key) && s.expire_at_ms > now_ms);
            if duplicate {
                return Ok(None);
            }
        }

        let id = JobId::new();
        jobs.push(StoredJob {
            job: QueueJob {
                id,
                name: name.to_string(),
                data: payload,
                state: JobState::Created,
                retry_count: 0,
                retry_limit: opts.retry_limit,
                priority: opts.priority,
                singleton_key: opts.singleton_key.clone(),
                created_at_ms: now_ms,
                start_after_ms: now_ms,
            },
            retry_delay: opts.retry_delay,
            expire_at_ms: now_ms + u64::from(opts.expire_in_hours) * 3_600_000,
        });
        Ok(Some(id))
    }

    async fn work(
        &self,
        name: &str,
        opts: WorkOptions,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkHandle, QueueError> {
        self.create_queue(name).await?;

        let token = CancellationToken::new();
        let queue = self.clone();
        let queue_name = name.to_string();
        let loop_token = token.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(
                opts.team_concurrency.max(1) as usize
            ));
            let mut inflight = tokio::task::JoinSet::new();

            loop {
                if loop_token.is_cancelled() {
                    break;
                }

                let batch = queue.claim(&queue_name, opts.team_size.max(1) as usize);
                let got_work = !batch.is_empty();

                for job in batch {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let handler = handler.clone();
                    let queue = queue.clone();
                    inflight.spawn(async move {
                        let id = job.id;
                        let outcome = handler.handle(job).await;
                        queue.settle(id, outcome);
                        drop(permit);
                    });
                }

                while inflight.try_join_next().is_some() {}

                if !got_work {
                    tokio::select! {
                        _ = loop_token.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }

            while inflight.join_next().await.is_some() {}
        });

        Ok(WorkHandle::new(token, vec![task]))
    }

    async fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        for jobs in state.queues.values_mut() {
            if let Some(stored) = jobs.iter_mut().find(|s| s.job.id == id) {
                if !stored.job.state.is_terminal() {
                    stored.job.state = JobState::Failed;
                }
            }
        }
        Ok(())
    }

    async fn get_job_by_id(&self, id: JobId) -> Result<Option<QueueJob>, QueueError> {
        let state = self.state.lock();
        for jobs in state.queues.values() {
            if let Some(stored) = jobs.iter().find(|s| s.job.id == id) {
                return Ok(Some(stored.job.clone()));
            }
        }
        Ok(None)
    }

    async fn get_queue_size(&self, name: &str) -> Result<QueueSize, QueueError> {
        let state = self.state.lock();
        let mut size = QueueSize::default();
        if let Some(jobs) = state.queues.get(name) {
            for stored in jobs {
                match stored.job.state {
                    JobState::Created | JobState::Retry => size.waiting += 1,
                    JobState::Active => size.active += 1,
                    JobState::Completed => size.completed += 1,
                    JobState::Failed => size.failed += 1,
                }
            }
        }
        Ok(size)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
