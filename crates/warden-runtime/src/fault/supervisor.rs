//! Fault supervisor
//!
//! Every fault source (the panic hook, failed background tasks, transport
//! notifications, handler failures and the memory monitor) funnels into one
//! task that logs, counts and, past the restart threshold, performs a
//! graceful restart: tear down collaborators, then exit with status 1 and
//! let an external process manager start a fresh process.

use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_kernel::config::FaultConfig;
use warden_kernel::{EventHub, HandlerFailure, TransportEvent};

use super::log::CrashLog;
use super::metrics::{CrashAssessment, CrashMetrics};
use super::record::{CrashRecord, FaultCategory};
use crate::process::{MemorySample, ProcessExit, ProcessProbe, Teardown};

/// Notification published by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultEvent {
    /// A fault was written to the crash log.
    Recorded {
        category: FaultCategory,
        message: String,
        crash_count: u32,
    },
    /// The crash count in the current window reached the warning threshold.
    CrashRateElevated { crash_count: u32 },
    /// The same fault signature reached the warning threshold.
    RecurringFault { signature: String, count: u32 },
    /// Sampled memory usage crossed the configured threshold.
    HighMemoryUsage { sample: MemorySample, percent: f64 },
    /// A graceful restart has begun.
    RestartInitiated { crash_count: u32 },
}

#[derive(Debug)]
enum FaultReport {
    Pending {
        category: FaultCategory,
        message: String,
        stack: String,
    },
    /// Already in the crash log; only needs counting.
    Persisted(CrashRecord),
}

/// Cheap handle for feeding faults to the supervisor task.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<FaultReport>,
}

impl FaultReporter {
    /// Queue a fault. Returns `false` once the supervisor task is gone.
    pub fn report(
        &self,
        category: FaultCategory,
        message: impl Into<String>,
        stack: impl Into<String>,
    ) -> bool {
        self.tx
            .send(FaultReport::Pending {
                category,
                message: message.into(),
                stack: stack.into(),
            })
            .is_ok()
    }

    fn persisted(&self, record: CrashRecord) -> bool {
        self.tx.send(FaultReport::Persisted(record)).is_ok()
    }
}

pub struct FaultSupervisor {
    config: FaultConfig,
    log: CrashLog,
    metrics: Mutex<CrashMetrics>,
    probe: Arc<ProcessProbe>,
    teardowns: Mutex<Vec<Arc<dyn Teardown>>>,
    exit: Arc<dyn ProcessExit>,
    restarting: AtomicBool,
    events: broadcast::Sender<FaultEvent>,
    reporter: FaultReporter,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<FaultReport>>>,
    cancel: CancellationToken,
}

impl FaultSupervisor {
    pub fn new(config: FaultConfig, exit: Arc<dyn ProcessExit>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            log: CrashLog::new(config.log_path.clone()),
            metrics: Mutex::new(CrashMetrics::new(
                config.crash_window(),
                config.warning_threshold,
                config.restart_threshold,
            )),
            probe: Arc::new(ProcessProbe::new()),
            teardowns: Mutex::new(Vec::new()),
            exit,
            restarting: AtomicBool::new(false),
            events,
            reporter: FaultReporter { tx },
            inbox: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn probe(&self) -> &Arc<ProcessProbe> {
        &self.probe
    }

    pub fn reporter(&self) -> FaultReporter {
        self.reporter.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FaultEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: FaultEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register a collaborator to shut down before a restart, in
    /// registration order.
    pub fn add_teardown(&self, teardown: Arc<dyn Teardown>) {
        self.teardowns.lock().push(teardown);
    }

    pub fn crash_count(&self) -> u32 {
        self.metrics.lock().crash_count()
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    /// Start the supervisor task. It consumes reported faults and the hub's
    /// transport and handler-failure notifications until [`stop`] is called.
    ///
    /// [`stop`]: FaultSupervisor::stop
    pub fn spawn(self: &Arc<Self>, hub: &EventHub) -> JoinHandle<()> {
        let this = self.clone();
        let inbox = self.inbox.lock().take();
        let mut transport = hub.subscribe_transport();
        let mut failures = hub.subscribe_failures();

        tokio::spawn(async move {
            if let Err(e) = this.log.ensure_dir().await {
                eprintln!("crash log unavailable: {e}");
            }
            let Some(mut inbox) = inbox else {
                warn!("fault supervisor already running");
                return;
            };
            info!(log = %this.log.path().display(), "fault supervisor started");

            let mut transport_open = true;
            let mut failures_open = true;
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    Some(report) = inbox.recv() => match report {
                        FaultReport::Pending { category, message, stack } => {
                            this.handle(category, &message, &stack).await;
                        }
                        FaultReport::Persisted(record) => {
                            this.assess(record).await;
                        }
                    },
                    received = transport.recv(), if transport_open => match received {
                        Ok(event) => this.on_transport(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "transport notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => transport_open = false,
                    },
                    received = failures.recv(), if failures_open => match received {
                        Ok(failure) => this.on_handler_failure(failure).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "handler failures dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => failures_open = false,
                    },
                }
            }
            info!("fault supervisor stopped");
        })
    }

    /// Stop the supervisor task and any monitor bound to it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn on_transport(&self, event: TransportEvent) {
        match event {
            TransportEvent::Error { message } => {
                self.handle(FaultCategory::Transport, &message, "transport error")
                    .await;
            }
            TransportEvent::Disconnect { shard, reason } => {
                let message = format!("shard {shard} disconnected: {reason}");
                self.handle(FaultCategory::Transport, &message, "transport disconnect")
                    .await;
            }
            TransportEvent::Reconnect { shard } => info!(shard, "transport reconnected"),
        }
    }

    async fn on_handler_failure(&self, failure: HandlerFailure) {
        let stack = format!("in handler `{}`", failure.handler);
        self.handle(FaultCategory::Rejection, &failure.error, &stack)
            .await;
    }

    /// Persist one fault, then [`assess`](Self::assess) it.
    pub(crate) async fn handle(
        &self,
        category: FaultCategory,
        message: &str,
        stack: &str,
    ) -> Option<CrashAssessment> {
        let probe = self.probe.clone();
        let stats = tokio::task::spawn_blocking(move || probe.stats())
            .await
            .unwrap_or_default();
        let record = CrashRecord::new(category, message, stack, stats);

        if let Err(e) = self.log.append(&record).await {
            eprintln!("failed to write crash log: {e}");
        }
        self.assess(record).await
    }

    /// Count a persisted fault, restarting if it is fatal and the restart
    /// threshold has been reached.
    async fn assess(&self, record: CrashRecord) -> Option<CrashAssessment> {
        let category = record.category;
        error!(category = %category, message = %record.message, "fault intercepted");

        if !category.is_counted() {
            self.publish(FaultEvent::Recorded {
                category,
                message: record.message.clone(),
                crash_count: self.crash_count(),
            });
            return None;
        }

        let (assessment, restart_due) = {
            let mut metrics = self.metrics.lock();
            let assessment = metrics.record(record.signature(), Instant::now());
            (assessment, metrics.restart_due())
        };

        self.publish(FaultEvent::Recorded {
            category,
            message: record.message.clone(),
            crash_count: assessment.crash_count,
        });
        if assessment.elevated {
            warn!(
                crash_count = assessment.crash_count,
                window_secs = self.config.crash_window_secs,
                "elevated crash rate"
            );
            self.publish(FaultEvent::CrashRateElevated {
                crash_count: assessment.crash_count,
            });
        }
        if assessment.recurring {
            warn!(signature = %record.signature(), count = assessment.recurrence, "recurring fault pattern");
            self.publish(FaultEvent::RecurringFault {
                signature: record.signature().to_string(),
                count: assessment.recurrence,
            });
        }

        if category.is_fatal() && restart_due {
            self.graceful_restart(assessment.crash_count).await;
        }
        Some(assessment)
    }

    /// Tear down every registered collaborator, each bounded by the
    /// teardown timeout, then exit with status 1. Runs at most once.
    pub async fn graceful_restart(&self, crash_count: u32) {
        if self.restarting.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(crash_count, "crash threshold reached, restarting gracefully");
        self.publish(FaultEvent::RestartInitiated { crash_count });

        let teardowns: Vec<Arc<dyn Teardown>> = self.teardowns.lock().clone();
        let timeout = self.config.teardown_timeout();
        for teardown in teardowns {
            match tokio::time::timeout(timeout, teardown.teardown()).await {
                Ok(Ok(())) => info!(target_name = teardown.name(), "torn down"),
                Ok(Err(e)) => error!(target_name = teardown.name(), error = %e, "teardown failed"),
                Err(_) => error!(target_name = teardown.name(), ?timeout, "teardown timed out"),
            }
        }

        self.exit.exit(1);
    }
}

/// Route panics to the supervisor as uncaught exceptions.
///
/// The record reaches the crash log before the hook returns, so a panic
/// that takes the runtime down with it is still on disk. Counting happens
/// on the supervisor task if it is running. The previously installed hook
/// runs last.
pub fn install_panic_hook(supervisor: &FaultSupervisor) {
    let log = supervisor.log.clone();
    let probe = supervisor.probe.clone();
    let reporter = supervisor.reporter();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let backtrace = std::backtrace::Backtrace::force_capture();
        let stack = format!("panicked at {location}\n{backtrace}");

        let record = CrashRecord::new(FaultCategory::Exception, message, stack, probe.try_stats());
        if let Err(e) = log.append_blocking(&record) {
            eprintln!("failed to write crash log: {e}");
        }
        reporter.persisted(record);
        previous(info);
    }));
}

/// Spawn `task`; if it returns an error nobody awaits, report it as an
/// unhandled rejection.
pub fn spawn_supervised<F, E>(reporter: FaultReporter, name: &str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task.await {
            reporter.report(FaultCategory::Rejection, e.to_string(), format!("in task `{name}`"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{BoxError, ProcessStats, RecordingExit};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingTeardown(Arc<AtomicUsize>);

    #[async_trait]
    impl Teardown for CountingTeardown {
        fn name(&self) -> &str {
            "counting"
        }

        async fn teardown(&self) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn supervisor(dir: &tempfile::TempDir) -> (Arc<FaultSupervisor>, Arc<RecordingExit>) {
        let exit = Arc::new(RecordingExit::default());
        let config = FaultConfig {
            log_path: dir.path().join("logs").join("errors.log"),
            ..Default::default()
        };
        (FaultSupervisor::new(config, exit.clone()), exit)
    }

    #[tokio::test]
    async fn test_rejections_never_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, exit) = supervisor(&dir);

        for _ in 0..6 {
            sup.handle(FaultCategory::Rejection, "late", "").await;
        }
        assert_eq!(sup.crash_count(), 6);
        assert!(exit.codes().is_empty());
        assert!(!sup.is_restarting());
    }

    #[tokio::test]
    async fn test_resource_warnings_are_logged_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _) = supervisor(&dir);

        let assessment = sup.handle(FaultCategory::ResourceWarning, "memory at 90%", "").await;
        assert!(assessment.is_none());
        assert_eq!(sup.crash_count(), 0);

        let log = std::fs::read_to_string(dir.path().join("logs/errors.log")).unwrap();
        assert!(log.contains("] Memory Warning"));
    }

    #[tokio::test]
    async fn test_recurring_fault_is_announced() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _) = supervisor(&dir);
        let mut events = sup.subscribe();

        for _ in 0..3 {
            sup.handle(FaultCategory::Transport, "socket hang up", "").await;
        }

        let mut recurring = None;
        while let Ok(event) = events.try_recv() {
            if let FaultEvent::RecurringFault { signature, count } = event {
                recurring = Some((signature, count));
            }
        }
        assert_eq!(recurring, Some(("socket hang up".to_string(), 3)));
    }

    #[tokio::test]
    async fn test_unwritable_log_does_not_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let exit = Arc::new(RecordingExit::default());
        let config = FaultConfig {
            log_path: blocker.join("errors.log"),
            ..Default::default()
        };
        let sup = FaultSupervisor::new(config, exit);

        let assessment = sup.handle(FaultCategory::Exception, "boom", "").await.unwrap();
        assert_eq!(assessment.crash_count, 1);
    }

    #[tokio::test]
    async fn test_persisted_report_is_counted_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, _) = supervisor(&dir);
        let hub = EventHub::new();
        let mut events = sup.subscribe();
        let task = sup.spawn(&hub);

        let record = CrashRecord::new(FaultCategory::Exception, "early", "", ProcessStats::default());
        sup.log.append_blocking(&record).unwrap();
        assert!(sup.reporter().persisted(record));

        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            FaultEvent::Recorded {
                category: FaultCategory::Exception,
                message: "early".to_string(),
                crash_count: 1,
            }
        );
        let log = std::fs::read_to_string(dir.path().join("logs/errors.log")).unwrap();
        assert_eq!(log.matches("] Uncaught Exception").count(), 1);

        sup.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_teardown_is_bounded() {
        struct Stuck;

        #[async_trait]
        impl Teardown for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }

            async fn teardown(&self) -> Result<(), BoxError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let exit = Arc::new(RecordingExit::default());
        let config = FaultConfig {
            log_path: dir.path().join("errors.log"),
            teardown_timeout_secs: 0,
            ..Default::default()
        };
        let sup = FaultSupervisor::new(config, exit.clone());
        sup.add_teardown(Arc::new(Stuck));

        tokio::time::timeout(Duration::from_secs(5), sup.graceful_restart(5))
            .await
            .unwrap();
        assert_eq!(exit.codes(), vec![1]);
    }

    #[tokio::test]
    async fn test_teardowns_run_in_order_once() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, exit) = supervisor(&dir);
        let hits = Arc::new(AtomicUsize::new(0));
        sup.add_teardown(Arc::new(CountingTeardown(hits.clone())));

        sup.graceful_restart(5).await;
        sup.graceful_restart(6).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(exit.codes(), vec![1]);
    }
}
