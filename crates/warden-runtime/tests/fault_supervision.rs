//! Fault supervisor end to end: reporter, hub notifications, crash log and
//! the graceful restart sequence.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use warden_kernel::config::FaultConfig;
use warden_kernel::{EventHub, HandlerFailure, TransportEvent};
use warden_runtime::fault::spawn_supervised;
use warden_runtime::process::BoxError;
use warden_runtime::{FaultCategory, FaultEvent, FaultSupervisor, RecordingExit, Teardown};

#[derive(Default)]
struct CountingTeardown {
    calls: AtomicUsize,
}

#[async_trait]
impl Teardown for CountingTeardown {
    fn name(&self) -> &str {
        "transport"
    }

    async fn teardown(&self) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    hub: Arc<EventHub>,
    supervisor: Arc<FaultSupervisor>,
    exit: Arc<RecordingExit>,
    teardown: Arc<CountingTeardown>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let exit = Arc::new(RecordingExit::default());
    let config = FaultConfig {
        log_path: dir.path().join("logs").join("errors.log"),
        ..Default::default()
    };
    let supervisor = FaultSupervisor::new(config, exit.clone());
    let teardown = Arc::new(CountingTeardown::default());
    supervisor.add_teardown(teardown.clone());

    Harness {
        dir,
        hub: Arc::new(EventHub::new()),
        supervisor,
        exit,
        teardown,
    }
}

impl Harness {
    fn log(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("logs/errors.log")).unwrap_or_default()
    }
}

async fn wait_for(events: &mut tokio::sync::broadcast::Receiver<FaultEvent>, n: usize) -> Vec<FaultEvent> {
    let mut seen = Vec::new();
    while seen
        .iter()
        .filter(|e| matches!(e, FaultEvent::Recorded { .. }))
        .count()
        < n
    {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_fifth_exception_restarts_exactly_once() {
    let h = harness();
    let mut events = h.supervisor.subscribe();
    let task = h.supervisor.spawn(&h.hub);
    let reporter = h.supervisor.reporter();

    for i in 0..7 {
        assert!(reporter.report(FaultCategory::Exception, format!("boom {i}"), "stack"));
    }
    let seen = wait_for(&mut events, 7).await;

    let restarts = seen
        .iter()
        .filter(|e| matches!(e, FaultEvent::RestartInitiated { .. }))
        .count();
    assert_eq!(restarts, 1);
    assert!(seen.contains(&FaultEvent::RestartInitiated { crash_count: 5 }));
    assert_eq!(h.teardown.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.exit.codes(), vec![1]);
    assert_eq!(h.log().matches("] Uncaught Exception").count(), 7);

    h.supervisor.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn test_crash_rate_warning_from_third_fault() {
    let h = harness();
    let mut events = h.supervisor.subscribe();
    let _task = h.supervisor.spawn(&h.hub);
    let reporter = h.supervisor.reporter();

    for _ in 0..3 {
        reporter.report(FaultCategory::Rejection, "late", "");
    }
    let seen = wait_for(&mut events, 3).await;

    assert!(seen.contains(&FaultEvent::CrashRateElevated { crash_count: 3 }));
    assert!(h.exit.codes().is_empty());
    h.supervisor.stop();
}

#[tokio::test]
async fn test_transport_notifications_are_recorded_not_restarted() {
    let h = harness();
    let mut events = h.supervisor.subscribe();
    let _task = h.supervisor.spawn(&h.hub);

    for shard in 0..5 {
        h.hub.report_transport(TransportEvent::Disconnect {
            shard,
            reason: "gateway closed".into(),
        });
    }
    h.hub.report_transport(TransportEvent::Reconnect { shard: 0 });
    h.hub.report_transport(TransportEvent::Error {
        message: "socket hang up".into(),
    });
    wait_for(&mut events, 6).await;

    let log = h.log();
    assert_eq!(log.matches("] Transport Error").count(), 6);
    assert!(log.contains("Message: shard 3 disconnected: gateway closed"));
    assert_eq!(h.supervisor.crash_count(), 6);
    assert!(h.exit.codes().is_empty());
    h.supervisor.stop();
}

#[tokio::test]
async fn test_handler_failures_and_failed_tasks_are_rejections() {
    let h = harness();
    let mut events = h.supervisor.subscribe();
    let _task = h.supervisor.spawn(&h.hub);

    h.hub.report_failure(HandlerFailure {
        handler: "messageCreate".into(),
        error: "handler raised: nope".into(),
    });
    let _job = spawn_supervised(h.supervisor.reporter(), "sync", async {
        Err::<(), _>("sync job failed")
    });

    let seen = wait_for(&mut events, 2).await;
    for event in &seen {
        if let FaultEvent::Recorded { category, .. } = event {
            assert_eq!(*category, FaultCategory::Rejection);
        }
    }
    let log = h.log();
    assert!(log.contains("Stack: in handler `messageCreate`"));
    assert!(log.contains("Message: sync job failed"));
    h.supervisor.stop();
}

#[tokio::test(start_paused = true)]
async fn test_crash_window_resets_after_quiet_minute() {
    let h = harness();
    let mut events = h.supervisor.subscribe();
    let _task = h.supervisor.spawn(&h.hub);
    let reporter = h.supervisor.reporter();

    reporter.report(FaultCategory::Exception, "first", "");
    wait_for(&mut events, 1).await;
    tokio::time::advance(Duration::from_secs(61)).await;
    reporter.report(FaultCategory::Exception, "second", "");
    let seen = wait_for(&mut events, 1).await;

    assert!(seen.contains(&FaultEvent::Recorded {
        category: FaultCategory::Exception,
        message: "second".to_string(),
        crash_count: 1,
    }));
    assert!(h.exit.codes().is_empty());
    h.supervisor.stop();
}
