//! Fault supervision: crash records, the durable crash log, rolling crash
//! metrics, and the supervisor that decides between logging and restarting.

mod log;
mod memory;
mod metrics;
mod record;
mod supervisor;

pub use log::{CrashLog, FaultLogError, FaultLogResult};
pub use memory::{check_sample, spawn_memory_monitor};
pub use metrics::{CrashAssessment, CrashMetrics};
pub use record::{CrashRecord, FaultCategory, SEPARATOR_WIDTH};
pub use supervisor::{
    FaultEvent, FaultReporter, FaultSupervisor, install_panic_hook, spawn_supervised,
};
