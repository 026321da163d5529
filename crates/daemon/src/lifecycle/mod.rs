// SPDX-License-Identifier: MIT

//! Daemon lifecycle: scheduler tasks and graceful shutdown.
//!
//! Every periodic concern (rate-limit eviction, orphan recovery, idle
//! scaling, queue maintenance, thread-queue cleanup) runs as a task owned
//! by one [`Schedulers`] set, all cancelled through a shared token on
//! shutdown. Tasks never crash the daemon: a failing pass logs and waits
//! for the next tick.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the daemon's background tasks.
pub struct Schedulers {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Schedulers {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedulers {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token shared by all scheduled tasks (and the consumers).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `tick` every `interval` until shutdown. The first tick fires
    /// after one interval, not immediately.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, interval: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = self.token.clone();
        self.handles.push(tokio::spawn(async move {
            tracing::debug!(task = name, ?interval, "scheduler task started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(task = name, "scheduler task stopped");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                tick().await;
            }
        }));
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
