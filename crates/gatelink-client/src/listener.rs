//! Lifecycle event listener

use std::sync::Arc;

use crate::error::ClientError;
use crate::session::Session;

/// Receives connection lifecycle events.
///
/// Callbacks run on the task that observed the event: `on_connected` on the
/// task calling `connect()`, the others on the session's I/O worker (or on
/// the task calling `stop()`). Each fires exactly once per event, in event
/// order for a given session.
pub trait EventListener: Send + Sync {
    fn on_connected(&self, _session: &Arc<Session>) {}

    fn on_disconnected(&self, _session: &Arc<Session>) {}

    fn on_exception(&self, _session: &Arc<Session>, _cause: &ClientError) {}
}

/// Forwards events to an optional listener; a missing listener drops them.
#[derive(Clone, Default)]
pub struct ListenerBridge {
    listener: Option<Arc<dyn EventListener>>,
}

impl ListenerBridge {
    pub fn new(listener: Option<Arc<dyn EventListener>>) -> Self {
        Self { listener }
    }

    pub fn is_attached(&self) -> bool {
        self.listener.is_some()
    }

    pub fn connected(&self, session: &Arc<Session>) {
        if let Some(listener) = &self.listener {
            listener.on_connected(session);
        }
    }

    pub fn disconnected(&self, session: &Arc<Session>) {
        if let Some(listener) = &self.listener {
            listener.on_disconnected(session);
        }
    }

    pub fn exception(&self, session: &Arc<Session>, cause: &ClientError) {
        if let Some(listener) = &self.listener {
            listener.on_exception(session, cause);
        }
    }
}
