//! Runtime context passed to every handler invocation.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::hub::EventHub;

/// Shared runtime context.
///
/// Owns the listener hub and exposes process-level facts handlers may use
/// (uptime, creation markers, registry counts).
pub struct HostContext {
    hub: Arc<EventHub>,
    started: Instant,
    started_at_ms: i64,
    commands: AtomicUsize,
    events: AtomicUsize,
}

impl HostContext {
    pub fn new(hub: Arc<EventHub>) -> Arc<Self> {
        Arc::new(Self {
            hub,
            started: Instant::now(),
            started_at_ms: Self::now_ms(),
            commands: AtomicUsize::new(0),
            events: AtomicUsize::new(0),
        })
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wall-clock creation marker in milliseconds since the Unix epoch.
    pub fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Record the current number of live commands and events.
    pub fn set_counts(&self, commands: usize, events: usize) {
        self.commands.store(commands, Ordering::Relaxed);
        self.events.store(events, Ordering::Relaxed);
    }

    /// `(commands, events)`
    pub fn counts(&self) -> (usize, usize) {
        (
            self.commands.load(Ordering::Relaxed),
            self.events.load(Ordering::Relaxed),
        )
    }

    /// Plain-data view handed to handler bodies as their first argument.
    pub fn snapshot(&self) -> Value {
        let (commands, events) = self.counts();
        json!({
            "pid": std::process::id(),
            "uptime_secs": self.uptime().as_secs(),
            "started_at_ms": self.started_at_ms,
            "now_ms": Self::now_ms(),
            "commands": commands,
            "events": events,
        })
    }
}
