//! Live session registry

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::session::{Session, SessionId};

/// Tracks every live session of a connection manager.
///
/// The manager registers a session right after its handshake and the
/// session's I/O worker (or `stop()`) removes it, so membership always
/// mirrors the set of open connections.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        debug!("Registering session {}", session.id());
        self.sessions.insert(session.id().to_string(), session);
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            debug!("Unregistered session {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// All sessions, oldest first
    pub fn all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at());
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and return every session
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let sessions = self.all();
        for session in &sessions {
            self.sessions.remove(session.id());
        }
        sessions
    }

    /// Queue `payload` on every session without waiting. A session whose
    /// queue is full or closed is logged and skipped. Returns the number of
    /// sessions the payload was queued on.
    pub fn broadcast(&self, payload: Bytes) -> usize {
        self.all()
            .iter()
            .filter(|session| match session.try_send(payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Broadcast to session {} failed: {}", session.id(), e);
                    false
                }
            })
            .count()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
