//! Warden - process host for live-reloaded handlers

mod app;
mod cli;
mod console;

use clap::Parser;
use cli::Cli;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_runtime::ShutdownSignals;

use crate::app::Warden;
use crate::console::{ConsoleExit, Relaunch};

fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(cli));
    // stdin is read on a blocking thread that never returns on its own.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = app::resolve_config(&cli)?;
    // Registered before boot so a signal sent mid-boot is not lost.
    let mut signals = ShutdownSignals::register()?;
    let warden = Warden::boot(config).await?;

    let restart = if cli.no_console {
        signals.recv().await;
        false
    } else {
        tokio::select! {
            _ = signals.recv() => false,
            exit = console::run(&warden) => match exit {
                ConsoleExit::Restart => true,
                ConsoleExit::Closed => {
                    signals.recv().await;
                    false
                }
            },
        }
    };

    warden.shutdown().await;

    if restart {
        let pid = Relaunch::current()?.spawn()?;
        info!(pid, "relaunched");
    }
    Ok(())
}
