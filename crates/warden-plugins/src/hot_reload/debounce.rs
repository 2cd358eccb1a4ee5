//! Per-path write stabilisation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks paths with pending writes until they go quiet.
///
/// A path is *pending* from its first change notification. Every further
/// notification pushes its deadline back. Once no change has been seen for
/// the stability interval it is *stable* and [`drain_stable`] hands it out
/// exactly once (*dispatched*).
///
/// [`drain_stable`]: DebounceTable::drain_stable
#[derive(Debug)]
pub struct DebounceTable {
    stability: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl DebounceTable {
    pub fn new(stability: Duration) -> Self {
        Self {
            stability,
            pending: HashMap::new(),
        }
    }

    /// Record a change to `path` observed at `now`.
    pub fn touch(&mut self, path: &Path, now: Instant) {
        self.pending.insert(path.to_path_buf(), now);
    }

    /// Remove and return every path that has been quiet for the stability
    /// interval, sorted.
    pub fn drain_stable(&mut self, now: Instant) -> Vec<PathBuf> {
        let stability = self.stability;
        let mut stable: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= stability)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &stable {
            self.pending.remove(path);
        }
        stable.sort();
        stable
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_path_is_released_after_quiet_interval() {
        let mut table = DebounceTable::new(Duration::from_millis(100));
        let path = Path::new("/cmds/utils/ping.rhai");

        table.touch(path, Instant::now());
        assert!(table.drain_stable(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(table.drain_stable(Instant::now()), vec![path.to_path_buf()]);
        assert!(table.is_empty());
        assert!(table.drain_stable(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_writes_extend_the_deadline() {
        let mut table = DebounceTable::new(Duration::from_millis(100));
        let path = Path::new("/events/ready.rhai");

        for _ in 0..5 {
            table.touch(path, Instant::now());
            tokio::time::advance(Duration::from_millis(60)).await;
            assert!(table.drain_stable(Instant::now()).is_empty());
        }

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(table.drain_stable(Instant::now()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_are_independent() {
        let mut table = DebounceTable::new(Duration::from_millis(100));
        let a = Path::new("/events/a.rhai");
        let b = Path::new("/events/b.rhai");

        table.touch(a, Instant::now());
        tokio::time::advance(Duration::from_millis(80)).await;
        table.touch(b, Instant::now());
        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(table.drain_stable(Instant::now()), vec![a.to_path_buf()]);
        assert!(table.is_pending(b));
    }
}
