//! Per-session I/O worker
//!
//! One task per session owns both socket halves and the session's own
//! filter chain. Inbound bytes pass through the chain into frames, frames
//! are decoded into messages and dispatched in arrival order on this task.
//! Outbound payloads from the session's queue take the reverse path.
//!
//! However the task ends (normal exit, panic, or abort) the session is
//! retired exactly once.

use bytes::{Bytes, BytesMut};
use gatelink_transport::{BoxedStream, FilterChain, FilterChainBuilder, TransportError};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::listener::ListenerBridge;
use crate::message::MessageCodec;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionState, Session, SessionIo};

/// Upper bound on a single socket read
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Everything a session's worker needs besides its socket and chain
pub(crate) struct SessionContext<M> {
    /// Template each session's filter chain is built from
    pub pipeline: FilterChainBuilder,
    pub codec: Arc<dyn MessageCodec<M>>,
    pub dispatcher: Dispatcher<M>,
    pub listener: ListenerBridge,
    pub registry: Arc<SessionRegistry>,
}

impl<M: Debug + Send + 'static> SessionContext<M> {
    /// Take a session out of service: unregister it and report the
    /// disconnect. Later calls for the same session do nothing.
    pub fn retire(&self, session: &Arc<Session>, state: ConnectionState) {
        if !session.mark_closed(state) {
            return;
        }
        self.registry.unregister(session.id());
        info!(
            "Session {} to {} closed ({:?})",
            session.id(),
            session.endpoint(),
            state
        );
        self.listener.disconnected(session);
    }

    fn ingest(
        &self,
        session: &Arc<Session>,
        chain: &FilterChain,
        raw: Bytes,
        frames: &mut BytesMut,
    ) -> Result<(), TransportError> {
        let data = chain.inbound_chunk(raw)?;
        frames.extend_from_slice(&data);

        while let Some(payload) = chain.next_frame(frames)? {
            session.touch();
            match self.codec.decode(payload) {
                Ok(message) => {
                    self.dispatcher.dispatch(message, session);
                }
                Err(e) => {
                    warn!("Decode error on session {}: {}", session.id(), e);
                    self.listener.exception(session, &e);
                }
            }
        }
        Ok(())
    }
}

/// Retires its session when dropped. A worker that unwinds leaves the
/// session `Failed`; a clean exit sets the final state first.
struct RetireGuard<M: Debug + Send + 'static> {
    ctx: Arc<SessionContext<M>>,
    session: Arc<Session>,
    state: ConnectionState,
}

impl<M: Debug + Send + 'static> Drop for RetireGuard<M> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("I/O worker for session {} panicked", self.session.id());
        }
        self.ctx.retire(&self.session, self.state);
    }
}

pub(crate) async fn run_session<M>(
    ctx: Arc<SessionContext<M>>,
    session: Arc<Session>,
    chain: FilterChain,
    stream: BoxedStream,
    io: SessionIo,
    mut shutdown: watch::Receiver<bool>,
    mut max_read: watch::Receiver<usize>,
) where
    M: Debug + Send + 'static,
{
    let mut guard = RetireGuard {
        ctx: ctx.clone(),
        session: session.clone(),
        state: ConnectionState::Failed,
    };

    let (mut reader, mut writer) = tokio::io::split(stream);
    let SessionIo {
        mut outgoing,
        mut close,
    } = io;
    let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut frames = BytesMut::new();
    let mut end_state = ConnectionState::Disconnected;

    loop {
        if chunk.capacity() - chunk.len() < READ_CHUNK_SIZE {
            chunk.reserve(READ_CHUNK_SIZE);
        }

        tokio::select! {
            Some(payload) = outgoing.recv() => {
                let wire = match chain.outbound(payload) {
                    Ok(wire) => wire,
                    Err(e) => {
                        warn!("Outbound filter error on session {}: {}", session.id(), e);
                        ctx.listener.exception(&session, &ClientError::from(e));
                        continue;
                    }
                };

                if let Err(e) = writer.write_all(&wire).await {
                    error!("Write error on session {}: {}", session.id(), e);
                    ctx.listener.exception(&session, &ClientError::from(TransportError::from(e)));
                    end_state = ConnectionState::Failed;
                    break;
                }
            }

            result = reader.read_buf(&mut chunk) => {
                match result {
                    Ok(0) => {
                        debug!("Session {} closed by peer", session.id());
                        break;
                    }
                    Ok(_) => {
                        let raw = chunk.split().freeze();
                        if let Err(e) = ctx.ingest(&session, &chain, raw, &mut frames) {
                            error!("Inbound error on session {}: {}", session.id(), e);
                            ctx.listener.exception(&session, &ClientError::from(e));
                            end_state = ConnectionState::Failed;
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error on session {}: {}", session.id(), e);
                        ctx.listener.exception(&session, &ClientError::from(TransportError::from(e)));
                        end_state = ConnectionState::Failed;
                        break;
                    }
                }
            }

            Ok(()) = max_read.changed() => {
                chain.set_max_read_size(*max_read.borrow_and_update());
            }

            changed = close.changed() => {
                if changed.is_err() || *close.borrow() {
                    debug!("Session {} closed locally", session.id());
                    break;
                }
            }

            _ = shutdown.changed() => {
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    guard.state = end_state;
}
