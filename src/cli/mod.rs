//! CLI interface for tradegate
//!
//! Provides subcommands for:
//! - `run`: Drive the automation loop from recorded decisions and ticks
//! - `status`: Show persisted account, positions and recent outcomes
//! - `config`: Show the effective configuration

mod run;
mod status;

pub use run::{RunArgs, Runtime};
pub use status::StatusArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tradegate")]
#[command(about = "Risk-governed trade execution engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine against an advisor decision file
    Run(RunArgs),
    /// Show persisted state
    Status(StatusArgs),
    /// Show the effective configuration
    Config,
}
