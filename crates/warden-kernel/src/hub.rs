//! Host runtime listener hub
//!
//! The hub is the part of the host runtime that handler units plug into:
//! named listeners with every/once semantics, plus two notification streams
//! that supervisors observe (transport-level events and handler failures).

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Callback bound to a named event.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle returned by [`EventHub::on`] / [`EventHub::once`], used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Transport-level notification from the host's outward connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport reported an error.
    Error { message: String },
    /// A transport shard dropped its connection.
    Disconnect { shard: u32, reason: String },
    /// A transport shard re-established its connection.
    Reconnect { shard: u32 },
}

/// A handler body failed while running asynchronously on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Event or command name.
    pub handler: String,
    /// Rendered error.
    pub error: String,
}

struct Binding {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Named-listener registry shared by the host and its handler units.
pub struct EventHub {
    listeners: Mutex<HashMap<String, Vec<Binding>>>,
    next_id: AtomicU64,
    transport_tx: broadcast::Sender<TransportEvent>,
    failure_tx: broadcast::Sender<HandlerFailure>,
}

impl EventHub {
    pub fn new() -> Self {
        let (transport_tx, _) = broadcast::channel(256);
        let (failure_tx, _) = broadcast::channel(256);
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            transport_tx,
            failure_tx,
        }
    }

    /// Attach `listener` to every emission of `event`.
    pub fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.bind(event, listener, false)
    }

    /// Attach `listener` to the next emission of `event` only.
    pub fn once(&self, event: &str, listener: Listener) -> ListenerId {
        self.bind(event, listener, true)
    }

    fn bind(&self, event: &str, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Binding { id, once, listener });
        debug!(event, ?id, once, "listener attached");
        id
    }

    /// Detach a listener. Returns `false` if it was not attached (for example
    /// a `once` listener that already fired).
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(bindings) = listeners.get_mut(event) else {
            return false;
        };
        let before = bindings.len();
        bindings.retain(|b| b.id != id);
        let removed = bindings.len() != before;
        if bindings.is_empty() {
            listeners.remove(event);
        }
        if removed {
            debug!(event, ?id, "listener detached");
        }
        removed
    }

    /// Invoke every listener of `event` with `args`. Returns how many ran.
    ///
    /// `once` bindings are detached before any listener runs, so they fire at
    /// most one time even if a listener re-emits the same event. Listeners
    /// run outside the hub lock.
    pub fn emit(&self, event: &str, args: &[Value]) -> usize {
        let snapshot: Vec<Listener> = {
            let mut listeners = self.listeners.lock();
            let Some(bindings) = listeners.get_mut(event) else {
                trace!(event, "no listeners");
                return 0;
            };
            let snapshot = bindings.iter().map(|b| b.listener.clone()).collect();
            bindings.retain(|b| !b.once);
            if bindings.is_empty() {
                listeners.remove(event);
            }
            snapshot
        };

        for listener in &snapshot {
            listener(args);
        }
        snapshot.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Names of events with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Detach every listener.
    pub fn clear(&self) {
        let mut listeners = self.listeners.lock();
        let count: usize = listeners.values().map(Vec::len).sum();
        listeners.clear();
        debug!(count, "all listeners detached");
    }

    /// Publish a transport-level notification.
    pub fn report_transport(&self, event: TransportEvent) {
        let _ = self.transport_tx.send(event);
    }

    pub fn subscribe_transport(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport_tx.subscribe()
    }

    /// Publish a handler failure.
    pub fn report_failure(&self, failure: HandlerFailure) {
        let _ = self.failure_tx.send(failure);
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<HandlerFailure> {
        self.failure_tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
