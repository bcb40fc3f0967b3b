//! Connection manager builder

use gatelink_transport::{Connector, Filter, FilterChainBuilder, FrameCodec, TcpConnector};
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::connection::SessionContext;
use crate::dispatch::{Consumer, Dispatcher};
use crate::listener::{EventListener, ListenerBridge};
use crate::manager::ConnectionManager;
use crate::message::{MessageCodec, MessagePool};
use crate::registry::SessionRegistry;
use crate::session::DEFAULT_OUTGOING_CAPACITY;

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder<M> {
    codec: Arc<dyn MessageCodec<M>>,
    pool: Arc<dyn MessagePool<M>>,
    consumer: Arc<dyn Consumer<M>>,
    listener: Option<Arc<dyn EventListener>>,
    pipeline: FilterChainBuilder,
    connector: Option<Arc<dyn Connector>>,
    config: Option<ClientConfig>,
    outgoing_capacity: usize,
    session_created: Option<Box<dyn Fn(&ClientConfig) + Send + Sync>>,
}

impl<M: Debug + Send + 'static> ConnectionManagerBuilder<M> {
    /// Create a new builder
    pub fn new(
        codec: Arc<dyn MessageCodec<M>>,
        pool: Arc<dyn MessagePool<M>>,
        consumer: Arc<dyn Consumer<M>>,
    ) -> Self {
        Self {
            codec,
            pool,
            consumer,
            listener: None,
            pipeline: FilterChainBuilder::new(),
            connector: None,
            config: None,
            outgoing_capacity: DEFAULT_OUTGOING_CAPACITY,
            session_created: None,
        }
    }

    /// Set the lifecycle event listener
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Add a named filter stage shared by every session.
    /// Stages named `ssl` or `tls` go first.
    pub fn filter(mut self, name: &str, filter: Arc<dyn Filter>) -> Self {
        self.pipeline = self.pipeline.filter(name, filter);
        self
    }

    /// Add a named filter stage built fresh for each session, for filters
    /// that keep per-connection state such as a handshake or cipher.
    pub fn filter_factory(
        mut self,
        name: &str,
        factory: impl Fn() -> Arc<dyn Filter> + Send + Sync + 'static,
    ) -> Self {
        self.pipeline = self.pipeline.filter_factory(name, factory);
        self
    }

    /// Replace the default length-prefix codec stage
    pub fn frame_codec(mut self, name: &str, codec: Arc<dyn FrameCodec>) -> Self {
        self.pipeline = self.pipeline.codec(name, codec);
        self
    }

    /// Use a custom connector instead of TCP
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Initial configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Depth of each session's outgoing queue
    pub fn outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity;
        self
    }

    /// Callback fired after every successful connect
    pub fn on_session_created(
        mut self,
        callback: impl Fn(&ClientConfig) + Send + Sync + 'static,
    ) -> Self {
        self.session_created = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> ConnectionManager<M> {
        let ctx = SessionContext {
            pipeline: self.pipeline,
            codec: self.codec,
            dispatcher: Dispatcher::new(self.pool, self.consumer),
            listener: ListenerBridge::new(self.listener),
            registry: Arc::new(SessionRegistry::new()),
        };
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::new()),
        };

        let manager = ConnectionManager::from_parts(ctx, connector, self.outgoing_capacity);
        if let Some(callback) = self.session_created {
            manager.set_session_created(callback);
        }
        if let Some(config) = self.config {
            manager.configure(config);
        }
        manager
    }
}
