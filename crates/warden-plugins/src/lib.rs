//! Warden plugins
//!
//! Handler units backed by Rhai scripts, the extension registry that keeps
//! them addressable by name and alias, and the watcher that keeps the
//! registry in sync with the files on disk.

pub mod hot_reload;
pub mod layout;
pub mod script;

pub use hot_reload::{
    ChangeKind, DebounceTable, ExtensionRegistry, RegistryCounts, ReloadWatcher, WatchConfig,
    WatcherError,
};
pub use layout::SourceLayout;
pub use script::{LoadError, ScriptLoader, UnitLoader};
