// SPDX-License-Identifier: MIT

//! In-memory thread-session registry.
//!
//! Advisory bookkeeping only: lost on restart and rebuilt from queue and
//! cluster state. Terminal sessions are pruned lazily.

use parking_lot::Mutex;
use std::collections::HashMap;

use peerbot_core::{Clock, SessionKey, SessionStatus, ThreadSession};

/// Dispatcher-side session map.
pub struct SessionRegistry<C: Clock> {
    clock: C,
    sessions: Mutex<HashMap<SessionKey, ThreadSession>>,
}

impl<C: Clock> SessionRegistry<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create or refresh the record for an admitted message.
    pub fn upsert(&self, session: ThreadSession) {
        self.sessions
            .lock()
            .insert(session.session_key.clone(), session);
    }

    /// Advance a session's status, stamping activity.
    pub fn advance(&self, key: &SessionKey, status: SessionStatus) {
        let now_ms = self.clock.epoch_ms();
        if let Some(session) = self.sessions.lock().get_mut(key) {
            session.advance(status, now_ms);
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<ThreadSession> {
        self.sessions.lock().get(key).cloned()
    }

    /// Drop terminal sessions. Returns how many were pruned.
    pub fn prune_terminal(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_terminal());
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
