//! Endpoints and socket tuning parameters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A reconnection target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Socket options applied to every new connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// SO_RCVBUF in bytes (0 = OS default)
    pub receive_buffer_size: usize,
    /// SO_SNDBUF in bytes (0 = OS default)
    pub send_buffer_size: usize,
    /// Largest chunk read from the socket at once
    pub max_read_buffer_size: usize,
    /// SO_LINGER; `None` leaves lingering disabled
    pub linger: Option<Duration>,
    /// TCP_NODELAY
    pub nodelay: bool,
    /// Keep-alive idle time (`None` = disabled)
    pub keepalive: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            receive_buffer_size: 512 * 1024,
            send_buffer_size: 1024 * 1024,
            max_read_buffer_size: 1024 * 1024,
            linger: None,
            nodelay: true,
            keepalive: Some(Duration::from_secs(30)),
        }
    }
}
