//! Mediarelay CLI - Command-line interface
//!
//! Starts the HTTP relay against the simulated backend.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use mediarelay_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "mediarelay")]
#[command(about = "A chunked media relay streamer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level; the log file always records everything
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the last-run log file
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_tracing(cli.log_level.into(),cli.logs_dir.as_deref())?;
    tracing::debug!("Writing full log to {}", log_file.display());

    commands::handle_command(cli.command).await
}
