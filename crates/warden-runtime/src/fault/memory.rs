//! Periodic memory sampling.

use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::record::FaultCategory;
use super::supervisor::{FaultEvent, FaultSupervisor, spawn_supervised};
use crate::process::MemorySample;

const MB: f64 = 1024.0 * 1024.0;

/// Sample memory every `memory_check_secs` until the supervisor stops.
///
/// Usage above the threshold is logged, reported as a resource warning and
/// published as [`FaultEvent::HighMemoryUsage`]. In debug mode every sample
/// is logged. If sampling itself fails the monitor stops and the failure is
/// reported as a rejection.
pub fn spawn_memory_monitor(supervisor: Arc<FaultSupervisor>) -> JoinHandle<()> {
    let probe = supervisor.probe().clone();
    monitor_with(supervisor, move || probe.memory())
}

fn monitor_with<S>(supervisor: Arc<FaultSupervisor>, sampler: S) -> JoinHandle<()>
where
    S: Fn() -> MemorySample + Clone + Send + Sync + 'static,
{
    let reporter = supervisor.reporter();
    spawn_supervised(
        reporter,
        "memory monitor",
        sample_until_stopped(supervisor, sampler),
    )
}

async fn sample_until_stopped<S>(supervisor: Arc<FaultSupervisor>, sampler: S) -> Result<(), JoinError>
where
    S: Fn() -> MemorySample + Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(supervisor.config().memory_check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = supervisor.cancel_token().cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let sample = tokio::task::spawn_blocking(sampler.clone()).await?;
                check_sample(&supervisor, sample);
            }
        }
    }
}

/// Evaluate one sample against the configured threshold.
pub fn check_sample(supervisor: &FaultSupervisor, sample: MemorySample) {
    let config = supervisor.config();
    let percent = sample.usage_percent(config.memory_limit_bytes);

    if config.debug {
        info!(
            rss_mb = %format!("{:.2}", sample.rss as f64 / MB),
            virtual_mb = %format!("{:.2}", sample.virtual_memory as f64 / MB),
            usage_percent = %format!("{percent:.2}"),
            "performance metrics"
        );
    }

    if percent > config.memory_threshold_percent {
        warn!(usage_percent = %format!("{percent:.2}"), "high memory usage");
        supervisor.publish(FaultEvent::HighMemoryUsage { sample, percent });
        supervisor.reporter().report(
            FaultCategory::ResourceWarning,
            format!("memory usage at {percent:.2}%"),
            "memory monitor",
        );
    }
}
