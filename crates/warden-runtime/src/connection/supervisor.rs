//! Connection supervisor
//!
//! Sole owner of the data-store connection. Connect failures are retried
//! with a fixed back-off until the attempt budget is spent, at which point
//! the process exits with status 1. A periodic health check reports failed
//! probes but never changes state on its own; only the store's own
//! transport notifications do.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_kernel::config::StoreConfig;

use super::state::ConnectionState;
use super::store::{CollectionStats, DataStore, StoreError, StoreEvent};
use crate::process::{BoxError, ProcessExit, Teardown};
use crate::retry::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("gave up after {attempts} failed connection attempts: {last}")]
    Exhausted { attempts: u32, last: StoreError },

    #[error("connection supervisor is shutting down")]
    ShuttingDown,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Notification published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnected,
    Error { message: String },
    HealthCheckFailed { error: String },
}

/// Timing and budget for a [`ConnectionSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub retry: RetryConfig,
    pub health_check_interval: Duration,
    pub probe_timeout: Duration,
}

impl From<&StoreConfig> for SupervisorConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            retry: RetryConfig::from(config),
            health_check_interval: config.health_check_interval(),
            probe_timeout: config.selection_timeout(),
        }
    }
}

pub struct ConnectionSupervisor {
    store: Arc<dyn DataStore>,
    config: SupervisorConfig,
    state: Mutex<ConnectionState>,
    attempts: AtomicU32,
    events: broadcast::Sender<ConnectionEvent>,
    exit: Arc<dyn ProcessExit>,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    connecting: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        store: Arc<dyn DataStore>,
        config: SupervisorConfig,
        exit: Arc<dyn ProcessExit>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            attempts: AtomicU32::new(0),
            events,
            exit,
            cancel: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            connecting: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Follow the store's transport notifications, connect, then start the
    /// health check.
    ///
    /// Neither background loop returns an error: failures surface as
    /// [`ConnectionEvent`]s, and an exhausted budget exits the process.
    pub async fn start(self: &Arc<Self>) -> ConnectionResult<()> {
        let listener = tokio::spawn(self.clone().watch_store());
        self.tasks.lock().push(listener);

        self.connect().await?;

        let health = tokio::spawn(self.clone().health_check_loop());
        self.tasks.lock().push(health);
        Ok(())
    }

    /// Connect, retrying with the configured back-off.
    ///
    /// Exits the process with status 1 once the attempt budget is spent.
    pub async fn connect(&self) -> ConnectionResult<()> {
        let _guard = self.connecting.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> ConnectionResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ConnectionError::ShuttingDown);
            }

            self.set_state(ConnectionState::Connecting);
            match self.store.connect().await {
                Ok(()) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    self.publish(ConnectionEvent::Connected);
                    info!("connected to data store");
                    self.log_connection_info();
                    return Ok(());
                }
                Err(e) => {
                    self.set_state(ConnectionState::Error);
                    self.publish(ConnectionEvent::Error {
                        message: e.to_string(),
                    });
                    error!(error = %e, "data store connection failed");
                    self.back_off(e).await?;
                }
            }
        }
    }

    /// Count a failure and wait before the next attempt, or give up.
    async fn back_off(&self, last: StoreError) -> ConnectionResult<()> {
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.config.retry.max_attempts;

        if attempts >= max {
            error!(attempts, max, "maximum reconnect attempts reached");
            self.exit.exit(1);
            return Err(ConnectionError::Exhausted { attempts, last });
        }

        let delay = self.config.retry.delay;
        warn!(attempt = attempts, max, ?delay, "reconnecting to data store");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ConnectionError::ShuttingDown),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn watch_store(self: Arc<Self>) {
        let mut events = self.store.subscribe();
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "store notifications dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if let Err(e) = self.on_store_event(event).await {
                debug!(error = %e, "store notification handling stopped");
            }
        }
    }

    async fn on_store_event(&self, event: StoreEvent) -> ConnectionResult<()> {
        match event {
            StoreEvent::Disconnected { reason } => {
                self.set_state(ConnectionState::Disconnected);
                warn!(%reason, "disconnected from data store");
                self.publish(ConnectionEvent::Disconnected { reason });
                Ok(())
            }
            StoreEvent::Reconnected => {
                self.attempts.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                info!("reconnected to data store");
                self.publish(ConnectionEvent::Reconnected);
                Ok(())
            }
            StoreEvent::Error { message } => {
                error!(%message, "data store transport error");
                self.publish(ConnectionEvent::Error {
                    message: message.clone(),
                });
                let _guard = self.connecting.lock().await;
                self.set_state(ConnectionState::Error);
                self.back_off(StoreError::Connect(message)).await?;
                self.connect_locked().await
            }
        }
    }

    async fn health_check_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.health_check().await,
            }
        }
    }

    /// Probe the store if connected. Failures are published, state is left
    /// alone.
    pub async fn health_check(&self) {
        if !self.state().is_connected() {
            return;
        }

        let failure = match tokio::time::timeout(self.config.probe_timeout, self.store.ping()).await {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("data store did not acknowledge ping".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(StoreError::Timeout(self.config.probe_timeout).to_string()),
        };

        match failure {
            None => debug!("health check passed"),
            Some(error) => {
                warn!(%error, "health check failed");
                self.publish(ConnectionEvent::HealthCheckFailed { error });
            }
        }
    }

    /// Per-collection document counts and sizes.
    pub async fn collection_stats(&self) -> Result<Vec<CollectionStats>, StoreError> {
        if !self.state().is_connected() {
            return Err(StoreError::NotConnected);
        }

        let mut stats = Vec::new();
        for name in self.store.list_collections().await? {
            let entry = self.store.collection_stats(&name).await?;
            info!(
                collection = %entry.name,
                documents = entry.documents,
                size_mb = ?entry.size_bytes.map(|b| format!("{:.2}", b as f64 / 1024.0 / 1024.0)),
                "collection stats"
            );
            stats.push(entry);
        }
        Ok(stats)
    }

    /// Stop the health check, close the connection without forcing, and
    /// only then return. Idempotent.
    pub async fn graceful_shutdown(&self) -> Result<(), StoreError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        warn!("closing data store connection");
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let result = self.store.close(false).await;
        self.set_state(ConnectionState::Disconnected);
        match &result {
            Ok(()) => info!("data store connection closed"),
            Err(e) => error!(error = %e, "failed to close data store connection"),
        }
        result
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "unusual connection state transition");
        }
        debug!(from = %*state, to = %next, "connection state changed");
        *state = next;
    }

    fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn log_connection_info(&self) {
        let info = self.store.describe();
        info!(
            kind = info.kind,
            target = %info.target,
            database = %info.database,
            state = %self.state(),
            "connection info"
        );
    }
}

#[async_trait]
impl Teardown for ConnectionSupervisor {
    fn name(&self) -> &str {
        "data store connection"
    }

    async fn teardown(&self) -> Result<(), BoxError> {
        self.graceful_shutdown().await?;
        Ok(())
    }
}
