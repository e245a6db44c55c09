//! Logging setup.
//!
//! Uses journald when running under systemd on Linux; otherwise writes
//! daily rolling files under the given directory.

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system. Level comes from `FACETROVE_LOG`
/// (`error`, `warn`, `info` (default), `debug`, `trace`).
pub fn init(log_dir: &Path) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("FACETROVE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    if let Ok(journald_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(journald_layer)
            .init();
        tracing::debug!("logging to journald");
        return Ok(());
    }

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "facetrove.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop; park it for the life of the process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    tracing::debug!("logging to {}", log_dir.display());
    Ok(())
}
