//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("timeout after {0} ms")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("filter '{stage}' failed: {reason}")]
    Filter { stage: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("send buffer full")]
    BufferFull,

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Build a filter failure for the named stage.
    pub fn filter(stage: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TransportError::Filter {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }
}
