// SPDX-License-Identifier: MIT

//! Per-message update throttling.
//!
//! Chat platforms tolerate roughly one edit every couple of seconds per
//! message. The throttle sends immediately when the window is clear,
//! otherwise it keeps only the most recent content and flushes once the
//! window closes. Older coalesced content is gone for good — the final
//! update always wins.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::{ChatClient, ChatError};

struct Entry {
    last_sent: Option<Instant>,
    pending: Option<String>,
    flusher_running: bool,
}

/// Coalescing rate limit on `update_message`, keyed by `(channel, ts)`.
pub struct UpdateThrottle<C: ChatClient> {
    chat: Arc<C>,
    min_interval: Duration,
    entries: Arc<Mutex<HashMap<(String, String), Entry>>>,
}

impl<C: ChatClient> Clone for UpdateThrottle<C> {
    fn clone(&self) -> Self {
        Self {
            chat: self.chat.clone(),
            min_interval: self.min_interval,
            entries: self.entries.clone(),
        }
    }
}

impl<C: ChatClient> UpdateThrottle<C> {
    pub fn new(chat: Arc<C>) -> Self {
        Self::with_interval(chat, Duration::from_secs(2))
    }

    pub fn with_interval(chat: Arc<C>, min_interval: Duration) -> Self {
        Self {
            chat,
            min_interval,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submit content for a message. Sends now if the window is clear,
    /// otherwise coalesces and schedules a flush.
    pub async fn offer(&self, channel: &str, ts: &str, text: &str) -> Result<(), ChatError> {
        let key = (channel.to_string(), ts.to_string());
        let now = Instant::now();

        let send_now = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert(Entry {
                last_sent: None,
                pending: None,
                flusher_running: false,
            });

            let window_clear = entry
                .last_sent
                .map(|t| now.duration_since(t) >= self.min_interval)
                .unwrap_or(true);

            if window_clear && !entry.flusher_running {
                entry.last_sent = Some(now);
                true
            } else {
                entry.pending = Some(text.to_string());
                if !entry.flusher_running {
                    entry.flusher_running = true;
                    self.spawn_flusher(key.clone());
                }
                false
            }
        };

        if send_now {
            self.chat.update_message(channel, ts, text).await?;
        }
        Ok(())
    }

    /// Drain any pending update for a message immediately (shutdown path).
    pub async fn flush(&self, channel: &str, ts: &str) -> Result<(), ChatError> {
        let key = (channel.to_string(), ts.to_string());
        let pending = {
            let mut entries = self.entries.lock();
            entries.get_mut(&key).and_then(|e| e.pending.take())
        };
        if let Some(text) = pending {
            self.chat.update_message(channel, ts, &text).await?;
        }
        Ok(())
    }

    fn spawn_flusher(&self, key: (String, String)) {
        let throttle = self.clone();
        let interval = self.min_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let (channel, ts) = &key;
                let pending = {
                    let mut entries = throttle.entries.lock();
                    let Some(entry) = entries.get_mut(&key) else {
                        return;
                    };
                    match entry.pending.take() {
                        Some(text) => {
                            entry.last_sent = Some(Instant::now());
                            Some(text)
                        }
                        None => {
                            entry.flusher_running = false;
                            None
                        }
                    }
                };

                match pending {
                    Some(text) => {
                        if let Err(e) = throttle.chat.update_message(channel, ts, &text).await {
                            if e.is_permanent() {
                                tracing::info!(%channel, %ts, error = %e, "dropping coalesced update");
                            } else {
                                tracing::warn!(%channel, %ts, error = %e, "coalesced update failed");
                            }
                        }
                    }
                    None => return,
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;
