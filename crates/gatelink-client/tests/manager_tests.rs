//! Connection Manager Tests
//!
//! Lifecycle behavior of the connection manager against a scripted
//! connector:
//! - Batch connect and the session-created callback
//! - Fail-fast batches and timeouts
//! - Health checks
//! - Configuration handling
//! - Stop semantics

use gatelink_client::{ClientConfig, ClientError, ConnectionManager, DescriptorPool, Session};
use gatelink_test_utils::{
    init_tracing, wait_for, JsonCodec, RecordingConsumer, RecordingListener, ScriptedConnector,
    Step, TestMessage, DEFAULT_TIMEOUT,
};
use gatelink_transport::Endpoint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    manager: ConnectionManager<TestMessage>,
    connector: Arc<ScriptedConnector>,
    listener: Arc<RecordingListener>,
    created: Arc<AtomicUsize>,
}

fn config(max: usize) -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 100,
        ..ClientConfig::single("gs1", 9000, max)
    }
}

fn harness_with(connector: Arc<ScriptedConnector>, config: Option<ClientConfig>) -> Harness {
    init_tracing();
    let listener = RecordingListener::new();
    let created = Arc::new(AtomicUsize::new(0));
    let pool = DescriptorPool::new().with("chat.Say", 1).unwrap();

    let mut builder = ConnectionManager::<TestMessage>::builder(
        Arc::new(JsonCodec),
        Arc::new(pool),
        RecordingConsumer::new(),
    )
    .connector(connector.clone())
    .listener(listener.clone());
    if let Some(config) = config {
        builder = builder.config(config);
    }
    let manager = builder.build();

    let counter = created.clone();
    manager.set_session_created(move |_config: &ClientConfig| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    Harness {
        manager,
        connector,
        listener,
        created,
    }
}

fn harness(script: Vec<Step>, max: usize) -> Harness {
    harness_with(ScriptedConnector::new(script), Some(config(max)))
}

// ============================================================================
// Batch Connect
// ============================================================================

#[tokio::test]
async fn test_all_attempts_succeed() {
    let h = harness(vec![], 4);

    let opened = h.manager.connect().await;

    assert_eq!(opened, 4);
    assert_eq!(h.manager.session_count(), 4);
    assert_eq!(h.created.load(Ordering::SeqCst), 4);
    assert_eq!(h.listener.connected(), 4);
    assert_eq!(h.connector.attempts(), 4);
    assert!(h.manager.sessions().iter().all(|s| s.is_connected()));
}

#[tokio::test]
async fn test_failed_attempt_stops_batch() {
    let h = harness(vec![Step::Succeed, Step::Succeed, Step::Refuse], 5);

    let opened = h.manager.connect().await;

    assert_eq!(opened, 2);
    assert_eq!(h.manager.session_count(), 2);
    assert_eq!(h.connector.attempts(), 3, "no attempts after the failure");
    assert_eq!(h.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_first_attempt_fails() {
    let h = harness(vec![Step::Refuse], 3);

    assert_eq!(h.manager.connect().await, 0);
    assert_eq!(h.manager.session_count(), 0);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.listener.connected(), 0);
}

#[tokio::test]
async fn test_timeout_then_health_check_heals() {
    let h = harness(vec![Step::Succeed, Step::Succeed, Step::Hang], 3);

    let start = Instant::now();
    assert_eq!(h.manager.run().await, 2);
    assert!(start.elapsed() < Duration::from_secs(2), "attempt bounded by timeout");
    assert_eq!(h.manager.session_count(), 2);
    assert_eq!(h.connector.attempts(), 3);

    assert_eq!(h.manager.check_status().await, 1);
    assert_eq!(h.connector.attempts(), 4, "exactly one more batch");
    assert_eq!(h.manager.session_count(), 3);
}

#[tokio::test]
async fn test_round_robin_over_endpoints() {
    let config = ClientConfig {
        target_endpoints: vec![Endpoint::new("gs1", 9000), Endpoint::new("gs2", 9001)],
        max_connection_count: 3,
        ..config(3)
    };
    let h = harness_with(ScriptedConnector::new(vec![]), Some(config));

    h.manager.connect().await;

    assert_eq!(
        h.connector.targets(),
        vec![
            Endpoint::new("gs1", 9000),
            Endpoint::new("gs2", 9001),
            Endpoint::new("gs1", 9000)
        ]
    );
    let ports: Vec<_> = h
        .manager
        .sessions()
        .iter()
        .map(|s| s.endpoint().port)
        .collect();
    assert_eq!(ports.iter().filter(|p| **p == 9001).count(), 1);
}

// ============================================================================
// Health Check
// ============================================================================

#[tokio::test]
async fn test_check_status_noop_when_full() {
    let h = harness(vec![], 2);
    h.manager.connect().await;
    let attempts = h.connector.attempts();

    assert_eq!(h.manager.check_status().await, 0);
    assert_eq!(h.manager.connect().await, 0);
    assert_eq!(h.connector.attempts(), attempts);
}

#[tokio::test]
async fn test_check_status_reconnects_dropped_session() {
    let h = harness(vec![], 2);
    h.manager.connect().await;

    // Closing the far end ends the session
    drop(h.connector.take_peer(0));
    assert!(wait_for(|| h.manager.session_count() == 1, DEFAULT_TIMEOUT).await);
    assert_eq!(h.listener.disconnected(), 1);

    assert_eq!(h.manager.check_status().await, 1);
    assert_eq!(h.manager.session_count(), 2);
}

#[tokio::test]
async fn test_concurrent_health_checks_never_exceed_max() {
    let h = harness(vec![], 3);

    let checks: Vec<_> = (0..8)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.check_status().await })
        })
        .collect();
    let mut opened = 0;
    for check in checks {
        opened += check.await.unwrap();
    }

    assert_eq!(opened, 3);
    assert_eq!(h.manager.session_count(), 3);
    assert_eq!(h.connector.attempts(), 3);
}

#[tokio::test]
async fn test_spawned_health_check_heals() {
    let h = harness(vec![Step::Succeed, Step::Refuse], 2);
    assert_eq!(h.manager.connect().await, 1);

    let task = h.manager.spawn_health_check(Duration::from_millis(20));
    assert!(wait_for(|| h.manager.session_count() == 2, DEFAULT_TIMEOUT).await);

    h.manager.stop().await;
    tokio::time::timeout(DEFAULT_TIMEOUT, task)
        .await
        .expect("health check ends after stop")
        .unwrap();
}

#[tokio::test]
async fn test_zero_health_check_period_still_heals() {
    let h = harness(vec![Step::Succeed, Step::Refuse], 2);
    assert_eq!(h.manager.connect().await, 1);

    let task = h.manager.spawn_health_check(Duration::ZERO);
    assert!(wait_for(|| h.manager.session_count() == 2, DEFAULT_TIMEOUT).await);

    h.manager.stop().await;
    tokio::time::timeout(DEFAULT_TIMEOUT, task)
        .await
        .expect("health check ends after stop")
        .expect("health check task did not panic");
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_absent_config_is_ignored() {
    let h = harness(vec![], 2);

    assert!(!h.manager.configure(None::<ClientConfig>));
    assert_eq!(h.manager.config(), Some(config(2)));
}

#[tokio::test]
async fn test_invalid_config_is_ignored() {
    let h = harness(vec![], 2);

    let invalid = ClientConfig {
        connect_timeout_ms: 0,
        ..config(5)
    };
    assert!(!h.manager.configure(invalid));
    assert_eq!(h.manager.config().unwrap().max_connection_count, 2);
}

#[tokio::test]
async fn test_oversized_read_limit_is_rejected() {
    let h = harness(vec![], 2);

    let oversized = ClientConfig {
        max_read_buffer_size: usize::MAX,
        ..config(2)
    };
    assert!(!h.manager.configure(oversized));
    assert_eq!(h.manager.config(), Some(config(2)));

    assert_eq!(h.manager.connect().await, 2);
    assert!(h.manager.sessions().iter().all(|s| s.is_connected()));
}

#[tokio::test]
async fn test_connect_without_config_is_noop() {
    let h = harness_with(ScriptedConnector::new(vec![]), None);

    assert_eq!(h.manager.connect().await, 0);
    assert_eq!(h.manager.check_status().await, 0);
    assert_eq!(h.connector.attempts(), 0);
}

#[tokio::test]
async fn test_empty_endpoints_is_noop() {
    let config = ClientConfig {
        target_endpoints: vec![],
        ..config(3)
    };
    let h = harness_with(ScriptedConnector::new(vec![]), Some(config));

    assert_eq!(h.manager.connect().await, 0);
    assert_eq!(h.connector.attempts(), 0);
}

#[tokio::test]
async fn test_reconfigure_raises_target() {
    let h = harness(vec![], 1);
    h.manager.connect().await;
    assert_eq!(h.manager.session_count(), 1);

    assert!(h.manager.configure(config(3)));
    assert_eq!(h.manager.check_status().await, 2);
    assert_eq!(h.manager.session_count(), 3);
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_survives_dispose_error_twice() {
    let h = harness_with(
        ScriptedConnector::failing_dispose(vec![]),
        Some(config(2)),
    );
    h.manager.connect().await;

    h.manager.stop().await;
    h.manager.stop().await;

    assert!(h.manager.is_stopped());
    assert_eq!(h.manager.session_count(), 0);
    assert_eq!(h.listener.disconnected(), 2, "one disconnect per session");
    assert_eq!(h.connector.disposals(), 2);
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let h = harness(vec![], 2);
    h.manager.stop().await;

    assert_eq!(h.manager.connect().await, 0);
    assert_eq!(h.manager.run().await, 0);
    assert_eq!(h.manager.check_status().await, 0);
    assert_eq!(h.connector.attempts(), 0);
}

#[tokio::test]
async fn test_send_after_stop_is_refused() {
    let h = harness(vec![], 1);
    h.manager.connect().await;
    let session = h.manager.sessions().remove(0);
    h.manager.stop().await;

    let result = h
        .manager
        .send(&session, &TestMessage::new("chat.Say", "late"))
        .await;
    assert!(matches!(result, Err(ClientError::Stopped)));
}

#[tokio::test]
async fn test_stop_abandons_inflight_connect() {
    let config = ClientConfig {
        connect_timeout_ms: 60_000,
        ..config(1)
    };
    let h = harness_with(ScriptedConnector::new(vec![Step::Hang]), Some(config));

    let manager = h.manager.clone();
    let connect = tokio::spawn(async move { manager.connect().await });
    assert!(wait_for(|| h.connector.attempts() == 1, DEFAULT_TIMEOUT).await);

    tokio::time::timeout(DEFAULT_TIMEOUT, h.manager.stop())
        .await
        .expect("stop does not wait for the connect timeout");
    assert_eq!(connect.await.unwrap(), 0);
}

#[tokio::test]
async fn test_disconnect_fires_once_when_peer_and_stop_race() {
    let h = harness(vec![], 1);
    h.manager.connect().await;
    let session: Arc<Session> = h.manager.sessions().remove(0);

    drop(h.connector.take_peer(0));
    h.manager.stop().await;

    assert!(wait_for(|| !session.is_connected(), DEFAULT_TIMEOUT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.listener.disconnected(), 1);
}
