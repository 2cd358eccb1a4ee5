//! Live reload
//!
//! - [`ExtensionRegistry`]: the live name/alias tables and their mutation API
//! - [`ReloadWatcher`]: filesystem notifications to registry mutations
//! - [`DebounceTable`]: per-path write stabilisation used by the watcher

mod debounce;
mod registry;
mod watcher;

pub use debounce::DebounceTable;
pub use registry::{ExtensionRegistry, RegistryCounts};
pub use watcher::{
    ChangeKind, ReloadWatcher, WatchConfig, WatcherError, WatcherResult, classify_change,
};
