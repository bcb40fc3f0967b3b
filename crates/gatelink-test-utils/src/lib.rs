//! Common test helpers and utilities for gatelink tests
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - A framed TCP test server
//! - A scripted connector for deterministic connect outcomes
//! - Recording listener and consumer
//! - A JSON test message and codec

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use gatelink_client::{ClientError, EventListener, Message, MessageCodec, Session};
use gatelink_transport::{
    Connection, Connector, Endpoint, FrameCodec, LengthPrefixCodec, SocketOptions,
    TransportError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Install a fmt subscriber once; later calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
    }
    check()
}

// ============================================================================
// Test Messages
// ============================================================================

/// Application message used across tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    pub kind: String,
    pub body: String,
}

impl TestMessage {
    pub fn new(kind: &str, body: &str) -> Self {
        Self {
            kind: kind.to_string(),
            body: body.to_string(),
        }
    }
}

impl Message for TestMessage {
    fn descriptor(&self) -> &str {
        &self.kind
    }
}

/// JSON codec for [`TestMessage`]
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageCodec<TestMessage> for JsonCodec {
    fn encode(&self, message: &TestMessage) -> gatelink_client::Result<Bytes> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| ClientError::Codec(e.to_string()))
    }

    fn decode(&self, payload: Bytes) -> gatelink_client::Result<TestMessage> {
        serde_json::from_slice(&payload).map_err(|e| ClientError::Codec(e.to_string()))
    }
}

/// Length-prefix a JSON-encoded message the way a default chain expects it
pub fn frame_message(message: &TestMessage) -> Bytes {
    let payload = JsonCodec.encode(message).unwrap();
    LengthPrefixCodec::new().encode_frame(payload).unwrap()
}

/// Length-prefix an arbitrary payload
pub fn frame_raw(payload: &[u8]) -> Bytes {
    LengthPrefixCodec::new()
        .encode_frame(Bytes::copy_from_slice(payload))
        .unwrap()
}

// ============================================================================
// Recording Collaborators
// ============================================================================

/// A lifecycle event seen by [`RecordingListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Connected(String),
    Disconnected(String),
    Exception(String, String),
}

/// Listener that records every event
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    pub fn connected(&self) -> usize {
        self.count(|e| matches!(e, ListenerEvent::Connected(_)))
    }

    pub fn disconnected(&self) -> usize {
        self.count(|e| matches!(e, ListenerEvent::Disconnected(_)))
    }

    pub fn exceptions(&self) -> usize {
        self.count(|e| matches!(e, ListenerEvent::Exception(..)))
    }

    fn count(&self, predicate: impl Fn(&ListenerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl EventListener for RecordingListener {
    fn on_connected(&self, session: &Arc<Session>) {
        self.events
            .lock()
            .push(ListenerEvent::Connected(session.id().to_string()));
    }

    fn on_disconnected(&self, session: &Arc<Session>) {
        self.events
            .lock()
            .push(ListenerEvent::Disconnected(session.id().to_string()));
    }

    fn on_exception(&self, session: &Arc<Session>, cause: &ClientError) {
        self.events.lock().push(ListenerEvent::Exception(
            session.id().to_string(),
            cause.to_string(),
        ));
    }
}

/// Consumer that records each message with its session id
pub struct RecordingConsumer {
    received: Mutex<Vec<(TestMessage, String)>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<(TestMessage, String)> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }
}

impl gatelink_client::Consumer<TestMessage> for RecordingConsumer {
    fn consume(&self, message: TestMessage, session: &Arc<Session>) {
        self.received
            .lock()
            .push((message, session.id().to_string()));
    }
}

// ============================================================================
// Scripted Connector
// ============================================================================

/// Outcome of one scripted connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Hand back an in-memory stream
    Succeed,
    /// Fail immediately with a refusal
    Refuse,
    /// Never complete; the manager's timeout fires
    Hang,
}

/// Connector that plays back a fixed list of outcomes.
///
/// Attempts past the end of the script succeed. The far end of every
/// successful connection is kept so tests can talk to the client.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
    disposals: AtomicUsize,
    dispose_fails: bool,
    targets: Mutex<Vec<Endpoint>>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl ScriptedConnector {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self::build(script, false))
    }

    /// A connector whose `dispose` always fails
    pub fn failing_dispose(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self::build(script, true))
    }

    fn build(script: impl IntoIterator<Item = Step>, dispose_fails: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
            dispose_fails,
            targets: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Queue more outcomes
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().extend(steps);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    /// Endpoints in the order they were attempted
    pub fn targets(&self) -> Vec<Endpoint> {
        self.targets.lock().clone()
    }

    /// Take the server side of the `index`-th successful connection
    pub fn take_peer(&self, index: usize) -> Option<DuplexStream> {
        let mut peers = self.peers.lock();
        if index < peers.len() {
            Some(peers.remove(index))
        } else {
            None
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _options: &SocketOptions,
    ) -> gatelink_transport::Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push(endpoint.clone());
        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => {
                let (client, server) = tokio::io::duplex(64 * 1024);
                self.peers.lock().push(server);
                Ok(Connection {
                    stream: Box::new(client),
                    peer_addr: None,
                })
            }
            Step::Refuse => Err(TransportError::ConnectionFailed(format!(
                "{} refused",
                endpoint
            ))),
            Step::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Other("unreachable".into()))
            }
        }
    }

    fn dispose(&self) -> gatelink_transport::Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        if self.dispose_fails {
            Err(TransportError::Other("dispose failed".into()))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// TCP Test Server
// ============================================================================

/// A framed TCP server that echoes every frame back and can push frames to
/// all accepted connections.
pub struct TestServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Bytes>>>,
    pushers: Arc<Mutex<Vec<mpsc::UnboundedSender<Option<Bytes>>>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let pushers = Arc::new(Mutex::new(Vec::new()));

        let accept_task = {
            let accepted = accepted.clone();
            let received = received.clone();
            let pushers = pushers.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let (tx, rx) = mpsc::unbounded_channel();
                    pushers.lock().push(tx);
                    tokio::spawn(serve_connection(stream, rx, received.clone()));
                }
            })
        };

        Self {
            port,
            accepted,
            received,
            pushers,
            accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Frame payloads received from clients
    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().clone()
    }

    /// Write raw bytes to every open connection
    pub fn push_raw(&self, data: Bytes) {
        self.pushers
            .lock()
            .retain(|tx| tx.send(Some(data.clone())).is_ok());
    }

    /// Close every accepted connection
    pub fn drop_connections(&self) {
        for tx in self.pushers.lock().drain(..) {
            let _ = tx.send(None);
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    mut push_rx: mpsc::UnboundedReceiver<Option<Bytes>>,
    received: Arc<Mutex<Vec<Bytes>>>,
) {
    let codec = LengthPrefixCodec::new();
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(8192);

    loop {
        tokio::select! {
            push = push_rx.recv() => match push {
                Some(Some(data)) => {
                    if writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
                _ => break,
            },
            result = reader.read_buf(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        while let Ok(Some(payload)) = codec.decode_frame(&mut buf) {
                            received.lock().push(payload.clone());
                            let Ok(frame) = codec.encode_frame(payload) else { break };
                            if writer.write_all(&frame).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}
