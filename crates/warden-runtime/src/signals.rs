//! Termination signals.
//!
//! [`ShutdownSignals`] installs its handlers when registered, so a signal
//! that arrives before anyone awaits it is still delivered.

use std::fmt;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Which request ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl-C on platforms without Unix signals.
    Interrupt,
    /// SIGTERM, as sent by process managers.
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        })
    }
}

pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignals {
    /// Must be called from within a runtime.
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    pub async fn recv(&mut self) -> ShutdownSignal {
        let received = self.next().await;
        info!(signal = %received, "shutdown requested");
        received
    }

    #[cfg(unix)]
    async fn next(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> ShutdownSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handling unavailable");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::Interrupt
    }
}
