//! Logging setup.
//!
//! Two modes, chosen with `VEILLE_ENV`:
//! - **Production** (`VEILLE_ENV=production`): JSON lines to a daily rolling
//!   file plus compact, colorless stdout for the systemd journal
//! - **Development** (anything else): pretty stdout with span events
//!
//! The filter comes from `RUST_LOG`, falling back to `VEILLE_LOG_LEVEL`
//! (default `info`).

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Writer guards; dropping them loses buffered log lines.
static GUARDS: OnceLock<(WorkerGuard, WorkerGuard)> = OnceLock::new();

/// Prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "veille";

/// Logging flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// File + journal output.
    Production,
    /// Human readable stdout.
    Development,
}

impl LogMode {
    /// Read the mode from `VEILLE_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("VEILLE_ENV") {
            Ok(env) if env.eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed or a subscriber
/// is already installed.
pub fn init(mode: LogMode) -> anyhow::Result<()> {
    let level = std::env::var("VEILLE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    match mode {
        LogMode::Production => init_production(filter)?,
        LogMode::Development => init_development(filter)?,
    }
    Ok(())
}

fn init_production(filter: EnvFilter) -> anyhow::Result<()> {
    let dir = log_directory();
    std::fs::create_dir_all(&dir)?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        &dir,
        LOG_FILE_PREFIX,
    ));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps and does not render ANSI
    let journal_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(journal_layer)
        .try_init()?;

    let _ = GUARDS.set((file_guard, stdout_guard));
    Ok(())
}

fn init_development(filter: EnvFilter) -> anyhow::Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .try_init()?;
    Ok(())
}

/// Log directory: `VEILLE_LOG_DIR`, else `/var/log/veille` on the device,
/// else the platform data directory.
fn log_directory() -> PathBuf {
    if let Ok(dir) = std::env::var("VEILLE_LOG_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/veille")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "veille")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
