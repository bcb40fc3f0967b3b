//! Client configuration

use gatelink_transport::{Endpoint, SocketOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Upper bound for `max_read_buffer_size`
pub const MAX_FRAME_LIMIT: usize = i32::MAX as usize;

/// Connection targets, socket tuning and reconnection bounds.
///
/// Field defaults match a single game-server link; everything can be
/// overridden from JSON or TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Servers to connect to, tried round-robin
    pub target_endpoints: Vec<Endpoint>,
    /// Number of sessions the manager keeps open
    pub max_connection_count: usize,
    /// Per-attempt connect timeout
    pub connect_timeout_ms: u64,
    /// SO_RCVBUF
    pub receive_buffer_size: usize,
    /// SO_SNDBUF
    pub send_buffer_size: usize,
    /// Largest accepted frame, at most [`MAX_FRAME_LIMIT`]
    pub max_read_buffer_size: usize,
    /// SO_LINGER in seconds, unset leaves lingering off
    pub so_linger_secs: Option<u64>,
    pub tcp_nodelay: bool,
    /// Keep-alive idle time in seconds (0 = disabled)
    pub keepalive_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_endpoints: Vec::new(),
            max_connection_count: 1,
            connect_timeout_ms: 10_000,
            receive_buffer_size: 512 * 1024,
            send_buffer_size: 1024 * 1024,
            max_read_buffer_size: 1024 * 1024,
            so_linger_secs: None,
            tcp_nodelay: true,
            keepalive_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Config targeting a single endpoint
    pub fn single(host: impl Into<String>, port: u16, max_connection_count: usize) -> Self {
        Self {
            target_endpoints: vec![Endpoint::new(host, port)],
            max_connection_count,
            ..Default::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every connect attempt meaningless.
    ///
    /// An empty endpoint list is accepted here; connecting with it is
    /// reported at connect time instead.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config(
                "connect_timeout_ms must be positive".into(),
            ));
        }
        if self.max_read_buffer_size == 0 {
            return Err(ClientError::Config(
                "max_read_buffer_size must be positive".into(),
            ));
        }
        if self.max_read_buffer_size > MAX_FRAME_LIMIT {
            return Err(ClientError::Config(format!(
                "max_read_buffer_size {} exceeds {}",
                self.max_read_buffer_size, MAX_FRAME_LIMIT
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
            max_read_buffer_size: self.max_read_buffer_size,
            linger: self.so_linger_secs.map(Duration::from_secs),
            nodelay: self.tcp_nodelay,
            keepalive: (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.target_endpoints.is_empty());
        assert_eq!(config.max_connection_count, 1);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.socket_options(), SocketOptions::default());
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            max_connection_count = 3
            connect_timeout_ms = 2500
            so_linger_secs = 0

            [[target_endpoints]]
            host = "gs1"
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.target_endpoints, vec![Endpoint::new("gs1", 9000)]);
        assert_eq!(config.max_connection_count, 3);
        assert_eq!(config.socket_options().linger, Some(Duration::ZERO));
        assert_eq!(config.receive_buffer_size, 512 * 1024);
    }

    #[test]
    fn test_from_json() {
        let config = ClientConfig::from_json_str(
            r#"{"target_endpoints":[{"host":"gs2","port":9100}],"keepalive_secs":0}"#,
        )
        .unwrap();
        assert_eq!(config.target_endpoints[0].port, 9100);
        assert!(config.socket_options().keepalive.is_none());
    }

    #[test]
    fn test_validate_bounds_max_read() {
        let at_limit = ClientConfig {
            max_read_buffer_size: MAX_FRAME_LIMIT,
            ..ClientConfig::default()
        };
        assert!(at_limit.validate().is_ok());

        let too_large = ClientConfig {
            max_read_buffer_size: usize::MAX,
            ..ClientConfig::default()
        };
        assert!(matches!(too_large.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let result = ClientConfig::from_json_str(r#"{"connect_timeout_ms":0}"#);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
