//! Message dispatch
//!
//! Inbound messages are resolved to their registered id and handed to the
//! consumer on the caller's task. Messages the pool does not know are logged
//! and dropped: a peer running a newer protocol may legitimately send them.

use std::sync::Arc;
use tracing::error;

use crate::message::MessagePool;
use crate::session::Session;

/// Business-logic entry point for decoded messages
pub trait Consumer<M>: Send + Sync {
    fn consume(&self, message: M, session: &Arc<Session>);
}

impl<M, F> Consumer<M> for F
where
    F: Fn(M, &Arc<Session>) + Send + Sync,
{
    fn consume(&self, message: M, session: &Arc<Session>) {
        self(message, session)
    }
}

/// Result of a single dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the consumer under this id
    Consumed(u32),
    /// The pool has no id for the message; it was dropped
    Unregistered,
}

/// Routes decoded messages to the consumer
pub struct Dispatcher<M> {
    pool: Arc<dyn MessagePool<M>>,
    consumer: Arc<dyn Consumer<M>>,
}

impl<M: std::fmt::Debug> Dispatcher<M> {
    pub fn new(pool: Arc<dyn MessagePool<M>>, consumer: Arc<dyn Consumer<M>>) -> Self {
        Self { pool, consumer }
    }

    /// Resolve and deliver one message. Never fails.
    pub fn dispatch(&self, message: M, session: &Arc<Session>) -> DispatchOutcome {
        match self.pool.message_id(&message) {
            Some(id) => {
                self.consumer.consume(message, session);
                DispatchOutcome::Consumed(id)
            }
            None => {
                error!(
                    "Message {:?} from session {} is not registered",
                    message,
                    session.id()
                );
                DispatchOutcome::Unregistered
            }
        }
    }
}

impl<M> Clone for Dispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            consumer: self.consumer.clone(),
        }
    }
}
