//! Operator console
//!
//! Reads one command per stdin line while the host runs. See
//! [`ConsoleCommand`] for the accepted input.

mod banner;
mod command;
mod restart;

pub use banner::{Status, format_bytes, format_uptime};
pub use command::ConsoleCommand;
pub use restart::{RESTART_FLAG, Relaunch, clear_restart_flag};

use colored::Colorize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use warden_kernel::HandlerKind;

use crate::app::Warden;

/// Why the console stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked for a restart; the host has been torn down.
    Restart,
    /// stdin reached end of file.
    Closed,
}

enum Flow {
    Continue,
    Restart,
}

/// Serve operator commands until a restart is requested or stdin closes.
pub async fn run(warden: &Warden) -> ConsoleExit {
    if let Ok(cwd) = std::env::current_dir() {
        match clear_restart_flag(&cwd) {
            Ok(true) => debug!("removed stale restart flag"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not remove restart flag"),
        }
    }
    show_status(warden);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ConsoleExit::Closed,
            Err(e) => {
                error!(error = %e, "console input failed");
                return ConsoleExit::Closed;
            }
        };
        if let Flow::Restart = dispatch(warden, ConsoleCommand::parse(&line)).await {
            return ConsoleExit::Restart;
        }
    }
}

async fn dispatch(warden: &Warden, command: ConsoleCommand) -> Flow {
    match command {
        ConsoleCommand::Empty => {}
        ConsoleCommand::Restart => {
            println!("{}", "⚠ Restarting...".yellow());
            return Flow::Restart;
        }
        ConsoleCommand::Status => show_status(warden),
        ConsoleCommand::Help => print!("{}", banner::help()),
        ConsoleCommand::Run { name, args } => run_command(warden, &name, args).await,
        ConsoleCommand::Emit { event, args } => {
            let fired = warden.hub.emit(&event, &args);
            println!("{}", format!("✓ `{event}` dispatched to {fired} listener(s)").green());
        }
        ConsoleCommand::Stats => match warden.connection.collection_stats().await {
            Ok(stats) if stats.is_empty() => println!("{}", "ℹ No collections".blue()),
            Ok(stats) => {
                for s in stats {
                    let size = s.size_bytes.map(format_bytes).unwrap_or_else(|| "n/a".into());
                    println!("{}", format!("• {}: {} documents, {size}", s.name, s.documents).cyan());
                }
            }
            Err(e) => println!("{}", format!("✗ Collection statistics unavailable: {e}").red()),
        },
        ConsoleCommand::Reload => {
            let loaded = warden.registry.load_all(warden.layout.discover()).await;
            info!(loaded, "handlers reloaded from console");
            println!("{}", format!("✓ {loaded} handler(s) loaded").green());
        }
        ConsoleCommand::Unknown(input) => {
            println!(
                "{}",
                format!("✗ Unknown command `{input}`. Type `help` for the list.").red()
            );
        }
    }
    Flow::Continue
}

async fn run_command(warden: &Warden, name: &str, args: Vec<Value>) {
    let Some(unit) = warden.registry.resolve(name, HandlerKind::Command) else {
        println!("{}", format!("✗ No command named `{name}`").red());
        return;
    };
    let ctx = Arc::clone(warden.registry.context());
    let result = tokio::task::spawn_blocking(move || unit.execute(&ctx, &args)).await;

    match result {
        Ok(Ok(Value::Null)) => println!("{}", "✓ done".green()),
        Ok(Ok(value)) => println!("{value}"),
        Ok(Err(e)) => println!("{}", format!("✗ {e}").red()),
        Err(e) => println!("{}", format!("✗ command aborted: {e}").red()),
    }
}

fn show_status(warden: &Warden) {
    // ANSI: clear screen, cursor home
    print!("\x1B[2J\x1B[1;1H");
    let status = Status {
        version: env!("CARGO_PKG_VERSION"),
        memory_bytes: warden.faults.probe().memory().rss,
        uptime: warden.registry.context().uptime(),
        counts: warden.registry.counts(),
        connection: warden.connection.state(),
    };
    print!("{}", banner::render(&status));
}
