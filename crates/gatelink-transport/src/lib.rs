//! gatelink transport layer
//!
//! Byte-level plumbing shared by gatelink clients:
//! - Endpoints and socket tuning options
//! - The [`Connector`] seam and its TCP implementation
//! - Length-prefixed framing (the codec stage)
//! - Filter chains with security stages ordered first

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod tcp;
pub mod traits;

pub use codec::{LengthPrefixCodec, DEFAULT_MAX_READ_SIZE};
pub use endpoint::{Endpoint, SocketOptions};
pub use error::{Result, TransportError};
pub use filter::{
    build_chain, is_security_name, CodecFactory, FilterChain, FilterChainBuilder, FilterFactory,
    FilterStage, StageBehavior, StageKind, DEFAULT_CODEC_NAME,
};
pub use tcp::TcpConnector;
pub use traits::{AsyncStream, BoxedStream, Connection, Connector, Filter, FrameCodec};
