//! Connection manager
//!
//! Owns the connect / reconnect / stop lifecycle against the configured
//! endpoints. `connect()` and `stop()` are serialized by a lifecycle lock.
//! A connect batch opens only the sessions missing from
//! `max_connection_count`, computed under that lock, so concurrent health
//! checks never push the session count past the configured maximum.

use futures::future::join_all;
use gatelink_transport::{
    Connection, Connector, Endpoint, SocketOptions, TransportError, DEFAULT_MAX_READ_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::builder::ConnectionManagerBuilder;
use crate::config::ClientConfig;
use crate::connection::{run_session, SessionContext};
use crate::dispatch::Consumer;
use crate::error::{ClientError, Result};
use crate::message::{MessageCodec, MessagePool};
use crate::registry::SessionRegistry;
use crate::session::{ConnectionState, Session};

/// Shortest accepted health check period
pub const MIN_HEALTH_CHECK_PERIOD: Duration = Duration::from_millis(1);

/// Called after each successful connect with the active configuration
pub type SessionCreatedCallback = Arc<dyn Fn(&ClientConfig) + Send + Sync>;

/// Keeps a pool of sessions open against the configured game servers
pub struct ConnectionManager<M> {
    inner: Arc<ManagerInner<M>>,
}

struct ManagerInner<M> {
    config: RwLock<Option<ClientConfig>>,
    ctx: Arc<SessionContext<M>>,
    connector: Arc<dyn Connector>,
    lifecycle: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    max_read: watch::Sender<usize>,
    stopped: AtomicBool,
    session_created: RwLock<Option<SessionCreatedCallback>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_endpoint: AtomicUsize,
    outgoing_capacity: usize,
}

impl<M> Clone for ConnectionManager<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Debug + Send + 'static> ConnectionManager<M> {
    /// Create a builder
    pub fn builder(
        codec: Arc<dyn MessageCodec<M>>,
        pool: Arc<dyn MessagePool<M>>,
        consumer: Arc<dyn Consumer<M>>,
    ) -> ConnectionManagerBuilder<M> {
        ConnectionManagerBuilder::new(codec, pool, consumer)
    }

    pub(crate) fn from_parts(
        ctx: SessionContext<M>,
        connector: Arc<dyn Connector>,
        outgoing_capacity: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (max_read, _) = watch::channel(DEFAULT_MAX_READ_SIZE);
        Self {
            inner: Arc::new(ManagerInner {
                config: RwLock::new(None),
                ctx: Arc::new(ctx),
                connector,
                lifecycle: tokio::sync::Mutex::new(()),
                shutdown,
                max_read,
                stopped: AtomicBool::new(false),
                session_created: RwLock::new(None),
                workers: Mutex::new(Vec::new()),
                next_endpoint: AtomicUsize::new(0),
                outgoing_capacity,
            }),
        }
    }

    /// Replace the active configuration.
    ///
    /// An absent or invalid config is logged and leaves the current one in
    /// place. Returns whether the new config was applied.
    pub fn configure(&self, config: impl Into<Option<ClientConfig>>) -> bool {
        let Some(config) = config.into() else {
            warn!("Client configuration is missing, keeping current configuration");
            return false;
        };

        if let Err(e) = config.validate() {
            error!("Rejecting client configuration: {}", e);
            return false;
        }

        let mut active = self.inner.config.write();
        // Live sessions pick the new frame limit up from this channel
        self.inner.max_read.send_replace(config.max_read_buffer_size);
        info!(
            "Client configured: {} endpoint(s), {} connection(s), rcvbuf={} sndbuf={} max_read={} linger={:?}",
            config.target_endpoints.len(),
            config.max_connection_count,
            config.receive_buffer_size,
            config.send_buffer_size,
            config.max_read_buffer_size,
            config.so_linger_secs,
        );
        *active = Some(config);
        true
    }

    /// Snapshot of the active configuration
    pub fn config(&self) -> Option<ClientConfig> {
        self.inner.config.read().clone()
    }

    pub fn set_session_created(&self, callback: impl Fn(&ClientConfig) + Send + Sync + 'static) {
        *self.inner.session_created.write() = Some(Arc::new(callback));
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.ctx.registry
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.ctx.registry.all()
    }

    pub fn session_count(&self) -> usize {
        self.inner.ctx.registry.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Names of the filter stages every session runs through, in chain order
    pub fn filter_names(&self) -> Vec<String> {
        self.inner
            .ctx
            .pipeline
            .build()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Open sessions until `max_connection_count` are live.
    ///
    /// Only the missing sessions are attempted: with `open` sessions already
    /// registered a batch makes at most `max_connection_count - open`
    /// attempts. Each attempt waits at most `connect_timeout_ms`. The first
    /// failed attempt ends the batch; the health check retries later.
    /// Returns the number of sessions opened by this call.
    pub async fn connect(&self) -> usize {
        let _guard = self.inner.lifecycle.lock().await;

        if self.is_stopped() {
            warn!("Connection manager is stopped, not connecting");
            return 0;
        }

        let Some(config) = self.config() else {
            warn!("No client configuration, not connecting");
            return 0;
        };

        if config.target_endpoints.is_empty() {
            error!("Client configuration has no target endpoints");
            return 0;
        }

        let open = self.session_count();
        let wanted = config.max_connection_count.saturating_sub(open);
        if wanted == 0 {
            debug!("All {} session(s) already open", open);
            return 0;
        }

        info!(
            "Connecting to game servers: {} of {} session(s) to open",
            wanted, config.max_connection_count
        );

        let options = config.socket_options();
        let timeout = config.connect_timeout();
        let mut established = 0;

        for _ in 0..wanted {
            let endpoint = self.next_endpoint(&config.target_endpoints);
            debug!(state = ?ConnectionState::Connecting, "Connecting to {}", endpoint);

            match self.attempt(&endpoint, &options, timeout).await {
                Ok(connection) => {
                    self.establish(&config, endpoint, connection);
                    established += 1;
                }
                Err(e) => {
                    warn!(state = ?ConnectionState::Failed, "Connect to {} failed: {}", endpoint, e);
                    break;
                }
            }
        }

        established
    }

    /// One-shot entry point for a startup thread or scheduler
    pub async fn run(&self) -> usize {
        self.connect().await
    }

    /// Reconnect if fewer sessions are open than configured.
    pub async fn check_status(&self) -> usize {
        if self.is_stopped() {
            return 0;
        }

        let max = self
            .inner
            .config
            .read()
            .as_ref()
            .map_or(0, |c| c.max_connection_count);
        let open = self.session_count();
        if open >= max {
            return 0;
        }

        info!("{} of {} session(s) open, reconnecting", open, max);
        self.connect().await
    }

    /// Run `check_status` every `period` until the manager stops.
    /// Periods below [`MIN_HEALTH_CHECK_PERIOD`] are raised to it.
    pub fn spawn_health_check(&self, period: Duration) -> JoinHandle<()> {
        let period = if period < MIN_HEALTH_CHECK_PERIOD {
            warn!(
                "Health check period {:?} too short, using {:?}",
                period, MIN_HEALTH_CHECK_PERIOD
            );
            MIN_HEALTH_CHECK_PERIOD
        } else {
            period
        };
        let manager = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if manager.is_stopped() {
                            break;
                        }
                        manager.check_status().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Health check stopped");
        })
    }

    /// Close every session and release the connector.
    ///
    /// In-flight connect attempts are abandoned. Errors while disposing are
    /// logged; this always returns normally and may be called repeatedly.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);

        let _guard = self.inner.lifecycle.lock().await;

        for session in self.inner.ctx.registry.drain() {
            session.close();
            self.inner.ctx.retire(&session, ConnectionState::Disconnected);
        }

        let workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for worker in &workers {
            worker.abort();
        }
        // No worker outlives stop()
        join_all(workers).await;

        match self.inner.connector.dispose() {
            Ok(()) => info!("Client is stopped"),
            Err(e) => error!("Error while disposing connector: {}", e),
        }
    }

    /// Encode `message` and queue it on `session`
    pub async fn send(&self, session: &Session, message: &M) -> Result<()> {
        if self.is_stopped() {
            return Err(ClientError::Stopped);
        }
        let payload = self.inner.ctx.codec.encode(message)?;
        session.send(payload).await?;
        Ok(())
    }

    /// Encode `message` once and queue it on every open session without
    /// waiting on slow peers. Returns the number of sessions it was queued on.
    pub async fn broadcast(&self, message: &M) -> usize {
        match self.inner.ctx.codec.encode(message) {
            Ok(payload) => self.inner.ctx.registry.broadcast(payload),
            Err(e) => {
                error!("Failed to encode broadcast {:?}: {}", message, e);
                0
            }
        }
    }

    fn next_endpoint(&self, endpoints: &[Endpoint]) -> Endpoint {
        let index = self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed);
        endpoints[index % endpoints.len()].clone()
    }

    async fn attempt(
        &self,
        endpoint: &Endpoint,
        options: &SocketOptions,
        timeout: Duration,
    ) -> std::result::Result<Connection, TransportError> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(TransportError::Other("manager stopped".into()));
        }

        tokio::select! {
            result = tokio::time::timeout(timeout, self.inner.connector.connect(endpoint, options)) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout(timeout.as_millis() as u64)))
            }
            _ = shutdown.changed() => Err(TransportError::Other("connect aborted by stop".into())),
        }
    }

    fn establish(&self, config: &ClientConfig, endpoint: Endpoint, connection: Connection) {
        let (session, io) = Session::new(
            endpoint,
            connection.peer_addr,
            self.inner.outgoing_capacity,
        );
        let session = Arc::new(session);
        let ctx = &self.inner.ctx;

        let chain = ctx.pipeline.build();
        let max_read = self.inner.max_read.subscribe();
        chain.set_max_read_size(*max_read.borrow());

        ctx.registry.register(session.clone());
        info!(
            state = ?ConnectionState::Connected,
            "Connected session {} to {}",
            session.id(),
            session.endpoint()
        );
        ctx.listener.connected(&session);

        let worker = tokio::spawn(run_session(
            ctx.clone(),
            session,
            chain,
            connection.stream,
            io,
            self.inner.shutdown.subscribe(),
            max_read,
        ));
        {
            let mut workers = self.inner.workers.lock();
            workers.retain(|w| !w.is_finished());
            workers.push(worker);
        }

        let callback = self.inner.session_created.read().clone();
        if let Some(callback) = callback {
            callback(config);
        }
    }
}

impl<M> std::fmt::Debug for ConnectionManager<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("sessions", &self.inner.ctx.registry.len())
            .field("stopped", &self.inner.stopped.load(Ordering::SeqCst))
            .finish()
    }
}
