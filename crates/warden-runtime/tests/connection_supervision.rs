//! Connection supervisor behaviour against a scripted store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use warden_runtime::connection::{CollectionStats, StoreInfo, StoreResult};
use warden_runtime::{
    ConnectionEvent, ConnectionState, ConnectionSupervisor, DataStore, RecordingExit, RetryConfig,
    StoreError, StoreEvent, SupervisorConfig,
};

struct ScriptedStore {
    connects: Mutex<VecDeque<StoreResult<()>>>,
    connect_calls: AtomicUsize,
    ping: Mutex<StoreResult<bool>>,
    closes: Mutex<Vec<bool>>,
    events: broadcast::Sender<StoreEvent>,
}

impl ScriptedStore {
    /// Fails `failures` times, then succeeds forever.
    fn failing(failures: usize) -> Arc<Self> {
        let connects = (0..failures)
            .map(|i| Err(StoreError::Connect(format!("refused #{}", i + 1))))
            .collect();
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            connects: Mutex::new(connects),
            connect_calls: AtomicUsize::new(0),
            ping: Mutex::new(Ok(true)),
            closes: Mutex::new(Vec::new()),
            events,
        })
    }

    fn emit(&self, event: StoreEvent) {
        self.events.send(event).unwrap();
    }
}

#[async_trait]
impl DataStore for ScriptedStore {
    async fn connect(&self) -> StoreResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connects.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn close(&self, force: bool) -> StoreResult<()> {
        self.closes.lock().push(force);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<bool> {
        self.ping.lock().clone()
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        Ok(vec!["users".to_string()])
    }

    async fn collection_stats(&self, name: &str) -> StoreResult<CollectionStats> {
        Ok(CollectionStats {
            name: name.to_string(),
            documents: 7,
            size_bytes: Some(4096),
        })
    }

    fn describe(&self) -> StoreInfo {
        StoreInfo {
            kind: "scripted",
            target: "memory".to_string(),
            database: "test".to_string(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        retry: RetryConfig::fixed(5, Duration::from_secs(5)),
        health_check_interval: Duration::from_secs(30),
        probe_timeout: Duration::from_secs(5),
    }
}

fn supervisor(store: Arc<ScriptedStore>) -> (Arc<ConnectionSupervisor>, Arc<RecordingExit>) {
    let exit = Arc::new(RecordingExit::default());
    (ConnectionSupervisor::new(store, config(), exit.clone()), exit)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_exhaust_the_budget() {
    let store = ScriptedStore::failing(10);
    let (sup, exit) = supervisor(store.clone());

    let started = tokio::time::Instant::now();
    let err = sup.connect().await.unwrap_err();

    assert!(err.to_string().contains("5 failed connection attempts"));
    assert_eq!(store.connect_calls.load(Ordering::SeqCst), 5);
    assert_eq!(exit.codes(), vec![1]);
    assert_eq!(sup.state(), ConnectionState::Error);
    // Four fixed five-second pauses between five attempts.
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_success_on_third_attempt_resets_counter() {
    let store = ScriptedStore::failing(2);
    let (sup, exit) = supervisor(store.clone());
    let mut events = sup.subscribe();

    sup.connect().await.unwrap();

    assert_eq!(store.connect_calls.load(Ordering::SeqCst), 3);
    assert_eq!(sup.reconnect_attempts(), 0);
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert!(exit.codes().is_empty());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.last(), Some(&ConnectionEvent::Connected));
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, ConnectionEvent::Error { .. }))
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_check_failure_keeps_state() {
    let store = ScriptedStore::failing(0);
    *store.ping.lock() = Ok(false);
    let (sup, _) = supervisor(store.clone());
    let mut events = sup.subscribe();

    sup.start().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::HealthCheckFailed { .. }
    ));
    assert_eq!(sup.state(), ConnectionState::Connected);

    *store.ping.lock() = Err(StoreError::Query("timeout".into()));
    sup.health_check().await;
    assert_eq!(sup.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_transport_events_drive_state() {
    let store = ScriptedStore::failing(0);
    let (sup, _) = supervisor(store.clone());
    sup.start().await.unwrap();

    store.emit(StoreEvent::Disconnected {
        reason: "socket closed".into(),
    });
    settle().await;
    assert_eq!(sup.state(), ConnectionState::Disconnected);

    store.emit(StoreEvent::Reconnected);
    settle().await;
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(sup.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_enters_retry_path() {
    let store = ScriptedStore::failing(0);
    let (sup, exit) = supervisor(store.clone());
    sup.start().await.unwrap();
    let mut events = sup.subscribe();

    store.emit(StoreEvent::Error {
        message: "connection reset".into(),
    });

    loop {
        if events.recv().await.unwrap() == ConnectionEvent::Connected {
            break;
        }
    }
    assert_eq!(store.connect_calls.load(Ordering::SeqCst), 2);
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(sup.reconnect_attempts(), 0);
    assert!(exit.codes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_closes_once_without_force() {
    let store = ScriptedStore::failing(0);
    let (sup, _) = supervisor(store.clone());
    sup.start().await.unwrap();

    sup.graceful_shutdown().await.unwrap();
    sup.graceful_shutdown().await.unwrap();

    assert_eq!(*store.closes.lock(), vec![false]);
    assert_eq!(sup.state(), ConnectionState::Disconnected);

    // The health check is stopped: no probe runs after shutdown.
    *store.ping.lock() = Ok(false);
    let mut events = sup.subscribe();
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_collection_stats_require_connection() {
    let store = ScriptedStore::failing(0);
    let (sup, _) = supervisor(store.clone());
    assert!(matches!(
        sup.collection_stats().await,
        Err(StoreError::NotConnected)
    ));

    sup.connect().await.unwrap();
    let stats = sup.collection_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].documents, 7);
}
