//! gatelink client library
//!
//! Keeps a pool of TCP sessions open to game servers and routes decoded
//! messages to a consumer.
//!
//! # Example
//!
//! ```ignore
//! use gatelink_client::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = DescriptorPool::new().with("login.Response", 1002).unwrap();
//!     let manager = ConnectionManager::builder(
//!         Arc::new(MyCodec),
//!         Arc::new(pool),
//!         Arc::new(|msg: MyMessage, session: &Arc<Session>| {
//!             println!("{} -> {:?}", session.id(), msg);
//!         }),
//!     )
//!     .config(ClientConfig::single("gs1", 9000, 3))
//!     .build();
//!
//!     manager.run().await;
//!     let _health = manager.spawn_health_check(std::time::Duration::from_secs(5));
//! }
//! ```

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod manager;
pub mod message;
pub mod registry;
pub mod session;

mod connection;

pub use builder::ConnectionManagerBuilder;
pub use config::{ClientConfig, MAX_FRAME_LIMIT};
pub use dispatch::{Consumer, DispatchOutcome, Dispatcher};
pub use error::{ClientError, Result};
pub use listener::{EventListener, ListenerBridge};
pub use manager::{ConnectionManager, SessionCreatedCallback, MIN_HEALTH_CHECK_PERIOD};
pub use message::{DescriptorPool, Message, MessageCodec, MessagePool, RawCodec};
pub use registry::SessionRegistry;
pub use session::{ConnectionState, Session, SessionId, SessionIo};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::ConnectionManagerBuilder;
    pub use crate::config::ClientConfig;
    pub use crate::dispatch::Consumer;
    pub use crate::error::{ClientError, Result};
    pub use crate::listener::EventListener;
    pub use crate::manager::ConnectionManager;
    pub use crate::message::{DescriptorPool, Message, MessageCodec, MessagePool};
    pub use crate::session::Session;
    pub use gatelink_transport::{Endpoint, Filter};
}
