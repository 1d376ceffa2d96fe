//! Live sessions by id.

use std::collections::HashMap;

use eio_core::SessionId;
use parking_lot::Mutex;
use tracing::debug;

use crate::session::Session;

/// Every session that has not finished teardown.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under its id.
    pub fn insert(&self, session: Session) {
        let id = session.id().clone();
        let _ = self.sessions.lock().insert(id, session);
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }

    /// Remove a session. Returns it if it was present.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let removed = self.sessions.lock().remove(id);
        if removed.is_some() {
            debug!(sid = %id, "session removed from registry");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Ids of all live sessions.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Close every session. Teardown removes them asynchronously.
    pub fn close_all(&self) {
        let sessions: Vec<Session> = self.sessions.lock().values().cloned().collect();
        for session in sessions {
            session.close();
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
