//! Session management

use bytes::Bytes;
use gatelink_transport::{Endpoint, TransportError};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Session identifier
pub type SessionId = String;

/// Default depth of a session's outgoing queue
pub const DEFAULT_OUTGOING_CAPACITY: usize = 1024;

/// Connection lifecycle state of one managed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Closed because of a transport error
    Failed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Failed => 3,
        }
    }
}

/// Receiving ends handed to the session's I/O worker
pub struct SessionIo {
    pub outgoing: mpsc::Receiver<Bytes>,
    pub close: watch::Receiver<bool>,
}

/// One established connection to a game server
pub struct Session {
    id: SessionId,
    endpoint: Endpoint,
    peer_addr: Option<SocketAddr>,
    outgoing: mpsc::Sender<Bytes>,
    close_tx: watch::Sender<bool>,
    state: AtomicU8,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl Session {
    /// Create a connected session and the channel ends its I/O worker reads
    pub fn new(endpoint: Endpoint, peer_addr: Option<SocketAddr>, capacity: usize) -> (Self, SessionIo) {
        let (outgoing, outgoing_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(false);
        let now = Instant::now();

        let session = Self {
            id: Uuid::new_v4().to_string(),
            endpoint,
            peer_addr,
            outgoing,
            close_tx,
            state: AtomicU8::new(ConnectionState::Connected.as_u8()),
            created_at: now,
            last_activity: RwLock::new(now),
        };

        (
            session,
            SessionIo {
                outgoing: outgoing_rx,
                close: close_rx,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue an already-encoded payload for this session
    pub async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.outgoing
            .send(payload)
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        self.touch();
        Ok(())
    }

    /// Queue a payload without waiting for room in the outgoing queue
    pub fn try_send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.outgoing.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })?;
        self.touch();
        Ok(())
    }

    /// Ask the I/O worker to shut the connection down
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    /// Move out of `Connected` exactly once. Returns false if another path
    /// already retired this session.
    pub(crate) fn mark_closed(&self, state: ConnectionState) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connected.as_u8(),
                state.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Touch to update last activity
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Get idle duration
    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity.read().elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, SessionIo) {
        Session::new(Endpoint::new("gs1", 9000), None, 2)
    }

    #[tokio::test]
    async fn test_send_queues_payload() {
        let (session, mut io) = session();
        session.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(io.outgoing.recv().await.unwrap(), Bytes::from_static(b"ping"));
    }

    #[test]
    fn test_try_send_reports_full_queue() {
        let (session, _io) = session();
        session.try_send(Bytes::from_static(b"1")).unwrap();
        session.try_send(Bytes::from_static(b"2")).unwrap();
        assert!(matches!(
            session.try_send(Bytes::from_static(b"3")),
            Err(TransportError::BufferFull)
        ));
    }

    #[test]
    fn test_mark_closed_only_once() {
        let (session, _io) = session();
        assert!(session.is_connected());
        assert!(session.mark_closed(ConnectionState::Failed));
        assert!(!session.mark_closed(ConnectionState::Disconnected));
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(matches!(
            session.try_send(Bytes::new()),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_close_signals_worker() {
        let (session, io) = session();
        assert!(!*io.close.borrow());
        session.close();
        assert!(*io.close.borrow());
    }
}
