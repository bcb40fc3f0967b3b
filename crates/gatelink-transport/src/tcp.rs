//! TCP connector
//!
//! Resolves the endpoint, applies [`SocketOptions`] before the handshake and
//! hands back the connected stream. Framing and filtering happen above this
//! layer in the session's I/O worker.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, SocketOptions};
use crate::error::{Result, TransportError};
use crate::traits::{Connection, Connector};

/// Connector backed by tokio TCP sockets
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr> {
        lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("no address for {}", endpoint))
            })
    }
}

/// Apply buffer sizes, linger and keepalive to an unconnected socket
pub fn apply_socket_options(socket: &TcpSocket, options: &SocketOptions) -> Result<()> {
    let sock = socket2::SockRef::from(socket);

    if options.receive_buffer_size > 0 {
        sock.set_recv_buffer_size(options.receive_buffer_size)?;
    }
    if options.send_buffer_size > 0 {
        sock.set_send_buffer_size(options.send_buffer_size)?;
    }
    sock.set_linger(options.linger)?;

    if let Some(idle) = options.keepalive {
        let keepalive = socket2::TcpKeepalive::new().with_time(idle);
        if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable TCP keepalive: {}", e);
        }
    }

    Ok(())
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint, options: &SocketOptions) -> Result<Connection> {
        let addr = Self::resolve(endpoint).await?;
        debug!("Connecting to TCP: {} ({})", endpoint, addr);

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        apply_socket_options(&socket, options)?;

        let stream: TcpStream = socket
            .connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;

        if options.nodelay {
            stream.set_nodelay(true)?;
        }

        let peer_addr = stream.peer_addr().ok();
        info!("TCP connected to {}", endpoint);

        Ok(Connection {
            stream: Box::new(stream),
            peer_addr,
        })
    }
}
