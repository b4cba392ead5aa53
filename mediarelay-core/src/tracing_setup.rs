//! Logging for relay processes
//!
//! The console shows the relay's own events at a chosen level and keeps
//! dependencies at warn. A per-run log file keeps everything the relay
//! emits down to per-chunk trace events.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File the current run's log is written to, inside the logs directory.
pub const LOG_FILE_NAME: &str = "mediarelay-last-run.log";

/// Crates whose events follow the chosen console level.
const RELAY_TARGETS: [&str; 3] = ["mediarelay_core", "mediarelay_web", "mediarelay"];

/// Installs the global subscriber and returns the log file path.
///
/// `RUST_LOG`, when set, replaces the console directives entirely. The log
/// file is `{logs_dir}/mediarelay-last-run.log` (default `./logs`) and is
/// truncated on every run.
///
/// # Errors
///
/// - `std::io::Error` - Logs directory cannot be created or log file cannot be opened
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(LOG_FILE_NAME);
    let log_file = File::create(&log_file_path)?;

    tracing_subscriber::registry()
        .with(console_layer(console_level))
        .with(file_layer(log_file))
        .init();

    tracing::info!(
        "Logging relay events at {} to console, full log at {}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

fn console_layer<S>(level: Level) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(level)));

    fmt::layer().with_target(false).compact().with_filter(filter)
}

fn file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fmt::layer()
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file)
        .with_filter(EnvFilter::new(file_directives()))
}

/// `warn` for everything, `level` for the relay's own crates.
fn console_directives(level: Level) -> String {
    let level = CliLogLevel::from(level).as_str();
    RELAY_TARGETS
        .iter()
        .fold(String::from("warn"), |directives, target| {
            format!("{directives},{target}={level}")
        })
}

/// Relay crates at trace, dependencies at debug.
fn file_directives() -> String {
    RELAY_TARGETS
        .iter()
        .fold(String::from("debug"), |directives, target| {
            format!("{directives},{target}=trace")
        })
}

/// Console verbosity selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Failed fetches and server errors
    Error,
    /// Also soft failures: unavailable sessions, malformed chunks
    Warn,
    /// Also server start-up and shutdown
    Info,
    /// Also per-stream lifecycle and session reuse
    Debug,
    /// Everything, down to individual chunk fetches
    Trace,
}

impl CliLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        }
    }
}

/// # Examples
/// ```
/// use mediarelay_core::tracing_setup::CliLogLevel;
///
/// assert_eq!(tracing::Level::from(CliLogLevel::Debug), tracing::Level::DEBUG);
/// ```
impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl From<Level> for CliLogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::ERROR => CliLogLevel::Error,
            Level::WARN => CliLogLevel::Warn,
            Level::INFO => CliLogLevel::Info,
            Level::DEBUG => CliLogLevel::Debug,
            _ => CliLogLevel::Trace,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
