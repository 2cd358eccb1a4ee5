//! File system watcher for handler sources
//!
//! Observes the source roots recursively, debounces writes per path and
//! turns each stable path into a registry `load`, `update` or `remove`.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_kernel::config::ExtensionsConfig;

use super::debounce::DebounceTable;
use super::registry::ExtensionRegistry;
use crate::layout::SourceLayout;

/// Watcher setup failure.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to create file watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

pub type WatcherResult<T> = Result<T, WatcherError>;

/// Watch configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// A path is stable once it has been quiet this long
    pub stability: Duration,
    /// How often stable paths are collected
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stability: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&ExtensionsConfig> for WatchConfig {
    fn from(config: &ExtensionsConfig) -> Self {
        Self {
            stability: config.stability(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// What a stable path means for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Classify a stable path from whether it exists on disk and whether the
/// registry currently tracks it. A change to an untracked path is an
/// addition; a removal of an untracked path is nothing.
pub fn classify_change(exists: bool, tracked: bool) -> Option<ChangeKind> {
    match (exists, tracked) {
        (true, false) => Some(ChangeKind::Added),
        (true, true) => Some(ChangeKind::Changed),
        (false, true) => Some(ChangeKind::Removed),
        (false, false) => None,
    }
}

/// Live reload watcher.
pub struct ReloadWatcher {
    watcher: Mutex<Option<RecommendedWatcher>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReloadWatcher {
    /// Start watching the roots of `layout`.
    ///
    /// Roots that do not exist or cannot be watched are logged and skipped;
    /// the watcher keeps running for the rest.
    pub fn start(
        layout: SourceLayout,
        config: WatchConfig,
        registry: Arc<ExtensionRegistry>,
    ) -> WatcherResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = tx.send(result);
            },
            Config::default(),
        )
        .map_err(WatcherError::Create)?;

        for root in layout.roots() {
            if !root.is_dir() {
                warn!(root = %root.display(), "handler directory missing, not watched");
                continue;
            }
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => info!(root = %root.display(), "watching handler directory"),
                Err(source) => {
                    let err = WatcherError::Watch {
                        path: root.to_path_buf(),
                        source,
                    };
                    error!(error = %err, "live reload degraded");
                }
            }
        }

        let cancel = CancellationToken::new();
        // `run` returns `()`: per-file failures are logged and the loop goes on.
        let task = tokio::spawn(run(layout, config, registry, rx, cancel.clone()));

        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Stop delivering notifications. Idempotent.
    pub fn close(&self) {
        if self.watcher.lock().take().is_some() {
            info!("live reload watcher closed");
        }
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the dispatch task to finish after [`close`](Self::close).
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    layout: SourceLayout,
    config: WatchConfig,
    registry: Arc<ExtensionRegistry>,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) {
    let mut table = DebounceTable::new(config.stability);
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(Ok(event)) => observe(&layout, &registry, &mut table, event),
                Some(Err(e)) => warn!(error = %e, "file watcher error, continuing degraded"),
                None => break,
            },
            _ = ticker.tick() => {
                for path in table.drain_stable(Instant::now()) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    dispatch(&layout, &registry, &path).await;
                }
            }
        }
    }
    debug!("live reload task stopped");
}

fn observe(
    layout: &SourceLayout,
    registry: &ExtensionRegistry,
    table: &mut DebounceTable,
    event: Event,
) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }

    let now = Instant::now();
    for path in &event.paths {
        if layout.classify(path).is_some() {
            table.touch(path, now);
        } else if !path.exists() {
            // A removed directory takes every source beneath it along.
            for tracked in registry.tracked_paths() {
                if tracked.starts_with(path) {
                    table.touch(&tracked, now);
                }
            }
        }
    }
}

async fn dispatch(layout: &SourceLayout, registry: &ExtensionRegistry, path: &Path) {
    let Some(location) = layout.classify(path) else {
        return;
    };
    let exists = tokio::fs::try_exists(path).await.unwrap_or(false);

    match classify_change(exists, registry.is_tracked(path)) {
        Some(ChangeKind::Added) => {
            debug!(path = %path.display(), "source added");
            let _ = registry.load(&location).await;
        }
        Some(ChangeKind::Changed) => {
            debug!(path = %path.display(), "source changed");
            let _ = registry.update(&location).await;
        }
        Some(ChangeKind::Removed) => {
            debug!(path = %path.display(), "source removed");
            registry.remove(&location);
        }
        None => debug!(path = %path.display(), "untracked source vanished"),
    }
}
