//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("message '{descriptor}' or id {id} already registered")]
    DuplicateMessage { descriptor: String, id: u32 },

    #[error("manager stopped")]
    Stopped,

    #[error("transport error: {0}")]
    Transport(#[from] gatelink_transport::TransportError),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(e: toml::de::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}
