//! SQLite-backed [`DataStore`].

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::debug;
use warden_kernel::config::StoreConfig;

use super::store::{CollectionStats, DataStore, StoreError, StoreEvent, StoreInfo, StoreResult};

pub struct SqliteStore {
    url: String,
    options: SqliteConnectOptions,
    config: StoreConfig,
    pool: RwLock<Option<SqlitePool>>,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        if !config.url.starts_with("sqlite:") {
            return Err(StoreError::InvalidUrl(config.url.clone()));
        }
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))?
            .create_if_missing(true);
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            url: config.url.clone(),
            options,
            config: config.clone(),
            pool: RwLock::new(None),
            events,
        })
    }

    fn pool(&self) -> StoreResult<SqlitePool> {
        self.pool.read().clone().ok_or(StoreError::NotConnected)
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn connect(&self) -> StoreResult<()> {
        if let Some(dir) = self
            .options
            .get_filename()
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;
        }

        let connecting = SqlitePoolOptions::new()
            .min_connections(self.config.min_connections)
            .max_connections(self.config.max_connections.max(1))
            .acquire_timeout(self.config.selection_timeout())
            .connect_with(self.options.clone());

        let pool = tokio::time::timeout(self.config.connect_timeout(), connecting)
            .await
            .map_err(|_| StoreError::Timeout(self.config.connect_timeout()))?
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let previous = self.pool.write().replace(pool);
        if let Some(previous) = previous {
            previous.close().await;
            let _ = self.events.send(StoreEvent::Reconnected);
        }
        Ok(())
    }

    async fn close(&self, force: bool) -> StoreResult<()> {
        let Some(pool) = self.pool.write().take() else {
            return Ok(());
        };
        if force {
            // Dropping the last handle aborts idle connections immediately.
            drop(pool);
        } else {
            pool.close().await;
        }
        debug!(force, "sqlite pool closed");
        let _ = self.events.send(StoreEvent::Disconnected {
            reason: "closed".to_string(),
        });
        Ok(())
    }

    async fn ping(&self) -> StoreResult<bool> {
        let pool = self.pool()?;
        let row = sqlx::query("SELECT 1 AS ok")
            .fetch_one(&pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let ok: i64 = row
            .try_get("ok")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(ok == 1)
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let pool = self.pool()?;
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn collection_stats(&self, name: &str) -> StoreResult<CollectionStats> {
        let pool = self.pool()?;
        let quoted = name.replace('"', "\"\"");
        let documents: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{quoted}\""))
            .fetch_one(&pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        // Needs the dbstat virtual table, which not every build ships.
        let size_bytes: Option<i64> =
            sqlx::query_scalar("SELECT SUM(pgsize) FROM dbstat WHERE name = ?")
                .bind(name)
                .fetch_one(&pool)
                .await
                .ok()
                .flatten();

        Ok(CollectionStats {
            name: name.to_string(),
            documents: documents.max(0) as u64,
            size_bytes: size_bytes.map(|s| s.max(0) as u64),
        })
    }

    fn describe(&self) -> StoreInfo {
        let filename = self.options.get_filename();
        StoreInfo {
            kind: "sqlite",
            target: self.url.clone(),
            database: filename
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.display().to_string()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
