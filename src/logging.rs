use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "formatusb.log";

/// Sends logs to a daily rolling file; the terminal belongs to the UI.
/// Falls back to stderr when the log directory cannot be created.
pub fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_directive()));

    match file_writer() {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .init();

            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("formatusb: failed to initialize file logging: {e:#}");
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true);

            tracing_subscriber::registry()
                .with(EnvFilter::new("warn"))
                .with(stderr_layer)
                .init();
        }
    }
}

fn file_writer() -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = log_dir();

    if let Err(e) = fs::create_dir_all(&dir) {
        return Err(anyhow::anyhow!(
            "create log directory failed: {} ({})",
            dir.display(),
            e
        ));
    }

    let appender = tracing_appender::rolling::daily(&dir, OsString::from(LOG_PREFIX));
    Ok(tracing_appender::non_blocking(appender))
}

fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("FORMATUSB_LOG_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(xdg_state) = std::env::var_os("XDG_STATE_HOME") {
        return Path::new(&xdg_state).join("formatusb").join("logs");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Path::new(&home)
            .join(".local")
            .join("state")
            .join("formatusb")
            .join("logs");
    }

    PathBuf::from("/tmp").join("formatusb").join("logs")
}
