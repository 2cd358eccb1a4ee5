use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;

use crate::process::ProcessStats;

/// Width of the separator line closing every log entry.
pub const SEPARATOR_WIDTH: usize = 80;

/// Where a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    /// An asynchronous task failed and nobody awaited the error.
    Rejection,
    /// A panic escaped to the process boundary.
    Exception,
    /// The host transport reported an error or dropped a connection.
    Transport,
    /// Memory usage crossed the configured threshold.
    ResourceWarning,
}

impl FaultCategory {
    pub fn label(&self) -> &'static str {
        match self {
            FaultCategory::Rejection => "Unhandled Rejection",
            FaultCategory::Exception => "Uncaught Exception",
            FaultCategory::Transport => "Transport Error",
            FaultCategory::ResourceWarning => "Memory Warning",
        }
    }

    /// Only uncaught exceptions may escalate to a restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FaultCategory::Exception)
    }

    /// Resource warnings are logged but never counted as crashes.
    pub fn is_counted(&self) -> bool {
        !matches!(self, FaultCategory::ResourceWarning)
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One observed fault.
#[derive(Debug, Clone, Serialize)]
pub struct CrashRecord {
    pub timestamp: DateTime<Utc>,
    pub category: FaultCategory,
    pub message: String,
    pub stack: String,
    pub stats: ProcessStats,
}

impl CrashRecord {
    pub fn new(
        category: FaultCategory,
        message: impl Into<String>,
        stack: impl Into<String>,
        stats: ProcessStats,
    ) -> Self {
        let message = message.into();
        Self {
            timestamp: Utc::now(),
            category,
            message: if message.trim().is_empty() {
                "no error message".to_string()
            } else {
                message
            },
            stack: stack.into(),
            stats,
        }
    }

    /// Key used to detect recurring faults.
    pub fn signature(&self) -> &str {
        &self.message
    }

    /// Render the durable log entry, separator line included.
    pub fn to_log_entry(&self) -> String {
        let memory = serde_json::to_string(&self.stats.memory).unwrap_or_else(|_| "{}".to_string());
        format!(
            "[{}] {}\nMessage: {}\nStack: {}\nMemory: {}\nUptime: {}s\nPID: {}\n{}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.category.label(),
            self.message,
            self.stack,
            memory,
            self.stats.uptime_secs,
            self.stats.pid,
            "-".repeat(SEPARATOR_WIDTH),
        )
    }
}
