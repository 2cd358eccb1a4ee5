//! Process-level seams: exiting, tearing down collaborators, and sampling
//! the process's own resource usage.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminates the process.
///
/// Supervisors never call [`std::process::exit`] directly so that the exit
/// path can be observed in tests.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Exits the real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Records exit requests instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingExit {
    codes: Mutex<Vec<i32>>,
}

impl RecordingExit {
    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().clone()
    }
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().push(code);
    }
}

/// A collaborator that must be shut down cleanly before the process exits.
#[async_trait]
pub trait Teardown: Send + Sync {
    /// Short label for log lines.
    fn name(&self) -> &str;

    async fn teardown(&self) -> Result<(), BoxError>;
}

/// Process memory at one instant, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemorySample {
    pub rss: u64,
    pub virtual_memory: u64,
    pub total: u64,
}

impl MemorySample {
    /// Resident memory as a percentage of `limit`, or of total system
    /// memory when no limit is given.
    pub fn usage_percent(&self, limit: Option<u64>) -> f64 {
        let budget = limit.unwrap_or(self.total);
        if budget == 0 {
            return 0.0;
        }
        self.rss as f64 / budget as f64 * 100.0
    }
}

/// Facts attached to every crash record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    pub memory: MemorySample,
    pub uptime_secs: f64,
    pub pid: u32,
}

/// Samples this process through `sysinfo`.
pub struct ProcessProbe {
    system: Mutex<System>,
    started: Instant,
    pid: u32,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            started: Instant::now(),
            pid: std::process::id(),
        }
    }

    /// Blocking: refreshes system memory and this process's entry only.
    pub fn memory(&self) -> MemorySample {
        let mut sys = self.system.lock();
        Self::sample(&mut sys, self.pid)
    }

    pub fn stats(&self) -> ProcessStats {
        self.stats_from(self.memory())
    }

    /// Like [`stats`](Self::stats), but never waits on a sample already in
    /// progress. Memory reads as zero in that case. Safe to call from a
    /// panic hook.
    pub fn try_stats(&self) -> ProcessStats {
        let memory = self
            .system
            .try_lock()
            .map(|mut sys| Self::sample(&mut sys, self.pid))
            .unwrap_or_default();
        self.stats_from(memory)
    }

    fn sample(sys: &mut System, pid: u32) -> MemorySample {
        let pid = Pid::from_u32(pid);
        sys.refresh_memory();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let (rss, virtual_memory) = sys
            .process(pid)
            .map(|p| (p.memory(), p.virtual_memory()))
            .unwrap_or((0, 0));
        MemorySample {
            rss,
            virtual_memory,
            total: sys.total_memory(),
        }
    }

    fn stats_from(&self, memory: MemorySample) -> ProcessStats {
        ProcessStats {
            memory,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            pid: self.pid,
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}
