//! Process orchestration: boot order, teardown and shutdown.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_kernel::config::{self, WardenConfig};
use warden_kernel::{EventHub, HostContext};
use warden_plugins::{ExtensionRegistry, ReloadWatcher, ScriptLoader, SourceLayout, WatchConfig};
use warden_runtime::fault::{install_panic_hook, spawn_memory_monitor};
use warden_runtime::process::BoxError;
use warden_runtime::{
    ConnectionSupervisor, FaultSupervisor, SqliteStore, StdProcessExit, SupervisorConfig, Teardown,
};

use crate::cli::Cli;

/// Resolve the effective configuration: file (or defaults), then CLI and
/// environment overrides.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<WardenConfig> {
    let mut cfg: WardenConfig = config::load_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    if let Some(dir) = &cli.commands_dir {
        cfg.extensions.commands_dir = dir.clone();
    }
    if let Some(dir) = &cli.events_dir {
        cfg.extensions.events_dir = dir.clone();
    }
    if let Some(url) = &cli.database_url {
        cfg.store.url = url.clone();
    }
    if std::env::var("DEBUG").is_ok_and(|v| v.eq_ignore_ascii_case("true")) {
        cfg.faults.debug = true;
    }
    Ok(cfg)
}

/// Stops live reload and detaches every handler listener.
struct Extensions {
    watcher: Option<ReloadWatcher>,
    registry: Arc<ExtensionRegistry>,
}

#[async_trait]
impl Teardown for Extensions {
    fn name(&self) -> &str {
        "extensions"
    }

    async fn teardown(&self) -> Result<(), BoxError> {
        if let Some(watcher) = &self.watcher {
            watcher.close();
            watcher.join().await;
        }
        self.registry.shutdown();
        Ok(())
    }
}

/// Every long-lived component of a running host.
pub struct Warden {
    pub config: WardenConfig,
    pub hub: Arc<EventHub>,
    pub layout: SourceLayout,
    pub registry: Arc<ExtensionRegistry>,
    pub connection: Arc<ConnectionSupervisor>,
    pub faults: Arc<FaultSupervisor>,
    teardowns: Vec<Arc<dyn Teardown>>,
}

impl Warden {
    /// Boot in order: handlers and live reload, then the store connection,
    /// then fault supervision so it covers everything started before it.
    pub async fn boot(config: WardenConfig) -> anyhow::Result<Self> {
        let hub = Arc::new(EventHub::new());
        let ctx = HostContext::new(hub.clone());

        let loader = Arc::new(ScriptLoader::new(&config.extensions.limits));
        let registry = Arc::new(ExtensionRegistry::new(ctx, loader));
        let layout = SourceLayout::from_config(&config.extensions);
        let loaded = registry.load_all(layout.discover()).await;
        info!(loaded, "handlers loaded");

        let watcher = if config.extensions.watch {
            match ReloadWatcher::start(
                layout.clone(),
                WatchConfig::from(&config.extensions),
                registry.clone(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    error!(error = %e, "live reload unavailable");
                    None
                }
            }
        } else {
            None
        };
        let extensions: Arc<dyn Teardown> = Arc::new(Extensions {
            watcher,
            registry: registry.clone(),
        });

        let store = SqliteStore::new(&config.store).context("invalid store configuration")?;
        let connection = ConnectionSupervisor::new(
            Arc::new(store),
            SupervisorConfig::from(&config.store),
            Arc::new(StdProcessExit),
        );
        connection
            .start()
            .await
            .context("data store connection failed")?;

        let faults = FaultSupervisor::new(config.faults.clone(), Arc::new(StdProcessExit));
        let teardowns: Vec<Arc<dyn Teardown>> = vec![
            extensions,
            connection.clone() as Arc<dyn Teardown>,
            hub.clone() as Arc<dyn Teardown>,
        ];
        for teardown in &teardowns {
            faults.add_teardown(teardown.clone());
        }
        faults.spawn(&hub);
        install_panic_hook(&faults);
        spawn_memory_monitor(faults.clone());
        info!("fault supervision active");

        hub.emit("ready", &[]);

        Ok(Self {
            config,
            hub,
            layout,
            registry,
            connection,
            faults,
            teardowns,
        })
    }

    /// Tear everything down in boot order, then stop fault supervision.
    pub async fn shutdown(&self) {
        let timeout = self.config.faults.teardown_timeout();
        for teardown in &self.teardowns {
            match tokio::time::timeout(timeout, teardown.teardown()).await {
                Ok(Ok(())) => info!(target_name = teardown.name(), "torn down"),
                Ok(Err(e)) => warn!(target_name = teardown.name(), error = %e, "teardown failed"),
                Err(_) => warn!(target_name = teardown.name(), ?timeout, "teardown timed out"),
            }
        }
        self.faults.stop();
        info!("shutdown complete");
    }
}
