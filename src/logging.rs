//! Logging configuration with journald support on Linux.
//!
//! Logs go to systemd's journal when it is reachable and to a daily rolling
//! file otherwise. Nothing is ever written to stdout: the worker binary
//! uses stdout for its event stream.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `CLIPSCORE_LOG=debug`.
pub const LOG_ENV: &str = "CLIPSCORE_LOG";

/// Default location of the log files.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipscore")
        .join("logs")
}

/// Initialize the logging system.
///
/// Log level can be controlled via `CLIPSCORE_LOG` (default `info`):
/// - `CLIPSCORE_LOG=debug` for chunking and fetch details
/// - `CLIPSCORE_LOG=clipscore=trace` for controller state changes
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()
                .context("Failed to set tracing subscriber")?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "clipscore.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread; keep it for the process lifetime.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
