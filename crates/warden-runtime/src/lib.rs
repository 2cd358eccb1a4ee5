//! Warden runtime
//!
//! - [`fault`]: intercepts panics, failed tasks, transport errors and memory
//!   pressure; logs them durably and restarts the process past a threshold
//! - [`connection`]: owns the data-store connection lifecycle
//! - [`process`]: exit, teardown and resource sampling seams
//! - [`retry`]: reconnect budget
//! - [`signals`]: termination signal handling

pub mod connection;
pub mod fault;
pub mod process;
pub mod retry;
pub mod signals;

pub use connection::{
    ConnectionError, ConnectionEvent, ConnectionState, ConnectionSupervisor, DataStore,
    SqliteStore, StoreError, StoreEvent, SupervisorConfig,
};
pub use fault::{CrashRecord, FaultCategory, FaultEvent, FaultReporter, FaultSupervisor};
pub use process::{ProcessExit, ProcessProbe, RecordingExit, StdProcessExit, Teardown};
pub use retry::RetryConfig;
pub use signals::{ShutdownSignal, ShutdownSignals};

mod hub_teardown {
    use async_trait::async_trait;
    use warden_kernel::EventHub;

    use crate::process::{BoxError, Teardown};

    #[async_trait]
    impl Teardown for EventHub {
        fn name(&self) -> &str {
            "event hub"
        }

        async fn teardown(&self) -> Result<(), BoxError> {
            self.clear();
            Ok(())
        }
    }
}
