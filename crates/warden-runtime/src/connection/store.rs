//! The external data store, as seen by the connection supervisor.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store url: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("query failed: {0}")]
    Query(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transport-level notification from the store driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Disconnected { reason: String },
    Reconnected,
    Error { message: String },
}

/// Where the store points, for the connection info log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub kind: &'static str,
    pub target: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: u64,
    pub size_bytes: Option<u64>,
}

/// Connect, close, ping and introspection calls. The query language of the
/// store is never needed.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Establish the connection, honouring the store's own timeouts.
    async fn connect(&self) -> StoreResult<()>;

    /// Close the connection. `force` aborts in-flight work instead of
    /// waiting for it.
    async fn close(&self, force: bool) -> StoreResult<()>;

    /// Lightweight liveness probe. `Ok(false)` is a non-affirmative answer.
    async fn ping(&self) -> StoreResult<bool>;

    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    async fn collection_stats(&self, name: &str) -> StoreResult<CollectionStats>;

    fn describe(&self) -> StoreInfo;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
