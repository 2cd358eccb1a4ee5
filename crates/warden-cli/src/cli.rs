//! CLI argument definitions using clap

use clap::Parser;
use std::path::PathBuf;

/// Warden - keeps handler scripts live, survives faults, holds the store connection
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short = 'c', long, default_value = "warden.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not read operator commands from stdin
    #[arg(long)]
    pub no_console: bool,

    /// Command handler root, overrides the config file
    #[arg(long)]
    pub commands_dir: Option<PathBuf>,

    /// Event handler root, overrides the config file
    #[arg(long)]
    pub events_dir: Option<PathBuf>,

    /// Data store URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
}
