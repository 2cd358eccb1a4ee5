use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub extensions: ExtensionsConfig,
    pub faults: FaultConfig,
    pub store: StoreConfig,
}

/// Handler sources and live reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Root of command sources, one sub-directory per category.
    pub commands_dir: PathBuf,
    /// Flat root of event sources.
    pub events_dir: PathBuf,
    /// Source file extension, without the dot.
    pub extension: String,
    /// Watch the roots and apply changes without restart.
    pub watch: bool,
    /// A write is stable once no change was seen for this long.
    pub stability_ms: u64,
    /// How often pending writes are checked for stability.
    pub poll_ms: u64,
    pub limits: ScriptLimits,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            commands_dir: PathBuf::from("commands"),
            events_dir: PathBuf::from("events"),
            extension: "rhai".to_string(),
            watch: true,
            stability_ms: 100,
            poll_ms: 100,
            limits: ScriptLimits::default(),
        }
    }
}

impl ExtensionsConfig {
    pub fn stability(&self) -> Duration {
        Duration::from_millis(self.stability_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

/// Resource limits applied to every handler script engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum number of operations per evaluation
    pub max_operations: u64,
    /// Maximum call stack depth
    pub max_call_levels: usize,
    /// Maximum string size
    pub max_string_size: usize,
    /// Maximum array size
    pub max_array_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 64,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
        }
    }
}

/// Fault supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Append-only crash log.
    pub log_path: PathBuf,
    pub crash_window_secs: u64,
    /// Crash count (and signature recurrence) at which warnings start.
    pub warning_threshold: u32,
    /// Crash count at which a fatal fault triggers a graceful restart.
    pub restart_threshold: u32,
    pub memory_check_secs: u64,
    pub memory_threshold_percent: f64,
    /// Memory budget for the usage ratio; total system memory when unset.
    pub memory_limit_bytes: Option<u64>,
    /// Upper bound on each teardown step of a graceful restart.
    pub teardown_timeout_secs: u64,
    /// Log a performance sample on every memory check.
    pub debug: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs").join("errors.log"),
            crash_window_secs: 60,
            warning_threshold: 3,
            restart_threshold: 5,
            memory_check_secs: 30,
            memory_threshold_percent: 85.0,
            memory_limit_bytes: None,
            teardown_timeout_secs: 10,
            debug: false,
        }
    }
}

impl FaultConfig {
    pub fn crash_window(&self) -> Duration {
        Duration::from_secs(self.crash_window_secs)
    }

    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_secs(self.memory_check_secs.max(1))
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

/// External data store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    /// Upper bound on acquiring a pooled connection.
    pub selection_timeout_secs: u64,
    pub health_check_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_secs: u64,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/warden.db".to_string(),
            connect_timeout_secs: 10,
            selection_timeout_secs: 5,
            health_check_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_delay_secs: 5,
            min_connections: 1,
            max_connections: 10,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.selection_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
