//! Operator status banner

use colored::Colorize;
use std::time::Duration;
use warden_plugins::RegistryCounts;
use warden_runtime::ConnectionState;

const RULE_WIDTH: usize = 50;

pub struct Status {
    pub version: &'static str,
    pub memory_bytes: u64,
    pub uptime: Duration,
    pub counts: RegistryCounts,
    pub connection: ConnectionState,
}

/// Human-readable byte count, base 1024.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// `Hh Mm Ss`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub fn render(status: &Status) -> String {
    let rule = "═".repeat(RULE_WIDTH);
    let mut out = String::new();
    out.push_str(&format!("\n{rule}\n"));
    out.push_str(&format!("{}\n", " WARDEN".bold().blue()));
    out.push_str(&format!("{rule}\n\n"));

    out.push_str(&format!("{}\n", format!("• Version    : v{}", status.version).blue()));
    out.push_str(&format!(
        "{}\n",
        format!("• Memory     : {}", format_bytes(status.memory_bytes)).blue()
    ));
    out.push_str(&format!(
        "{}\n",
        format!("• Uptime     : {}", format_uptime(status.uptime)).blue()
    ));
    out.push_str(&format!("{}\n\n", format!("• Store      : {}", status.connection).blue()));

    out.push_str(&format!(
        "{}\n",
        format!(
            "• Commands   : {} ({} categories)",
            status.counts.commands, status.counts.categories
        )
        .green()
    ));
    out.push_str(&format!(
        "{}\n\n",
        format!("• Events     : {}", status.counts.events).green()
    ));

    out.push_str(&format!("{}\n", "Console commands:".yellow()));
    out.push_str(&help());
    out
}

pub fn help() -> String {
    [
        "• restart              : tear down and relaunch",
        "• clear | status       : show this banner",
        "• run <name> [args..]  : execute a command",
        "• emit <event> [args..]: dispatch an event",
        "• stats                : data store collections",
        "• reload               : reload every handler",
    ]
    .iter()
    .map(|line| format!("{}\n", line.cyan()))
    .collect()
}
