//! File logging for the hook.
//!
//! The hook runs inside an agent's shell hook, so nothing may reach stdout
//! or stderr. Logs go to `~/.waggle/logs/hook.log`. If that cannot be set up
//! the hook runs without logging.

use fs_err as fs;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_NAME: &str = "hook.log";
const DEFAULT_FILTER: &str = "info";

/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = waggle_core::waggle_dir().ok()?.join(LOG_DIR_NAME);
    fs::create_dir_all(&log_dir).ok()?;

    let debug_enabled = env::var("WAGGLE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(&log_dir)
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .ok()?;

    Some(guard)
}
