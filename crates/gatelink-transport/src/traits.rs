//! Transport trait definitions

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::{Endpoint, SocketOptions};
use crate::error::Result;

/// Any duplex byte stream a connector can hand back.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Boxed duplex stream owned by a session's I/O worker
pub type BoxedStream = Box<dyn AsyncStream>;

/// An established connection, before any session bookkeeping
pub struct Connection {
    /// The connected stream
    pub stream: BoxedStream,
    /// Remote address, when the transport knows it
    pub peer_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

/// Opens connections to remote endpoints.
///
/// The connection manager bounds every call with its own connect timeout,
/// so implementations may simply await the underlying handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint`, applying `options` to the socket
    async fn connect(&self, endpoint: &Endpoint, options: &SocketOptions) -> Result<Connection>;

    /// Release connector-wide resources. Called every time the owner stops.
    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// A byte transform placed in a filter chain.
///
/// Filters before the codec stage see raw stream chunks; filters after it
/// see whole frame payloads. A filter registered through a factory belongs
/// to one connection and may keep that connection's state.
pub trait Filter: Send + Sync {
    /// Transform bytes travelling from the socket towards the application
    fn inbound(&self, data: Bytes) -> Result<Bytes>;

    /// Transform bytes travelling from the application towards the socket
    fn outbound(&self, data: Bytes) -> Result<Bytes>;
}

/// Splits a byte stream into frames and wraps payloads back into frames.
pub trait FrameCodec: Send + Sync {
    /// Take the next complete frame payload out of `buf`, if one is buffered
    fn decode_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>>;

    /// Wrap a payload into a frame
    fn encode_frame(&self, payload: Bytes) -> Result<Bytes>;

    /// Update the largest frame accepted on read
    fn set_max_read_size(&self, max: usize);

    /// Current largest frame accepted on read
    fn max_read_size(&self) -> usize;
}
