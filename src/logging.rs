//! Structured JSON logging setup (spec §4.9, §10.1).
//!
//! One `tracing-subscriber` JSON layer, filtered by `GlobalConfig.log_level`,
//! writing to stdout or, when `OAUTH_BROKER_LOG_FILE` is set, to a rolling
//! file via a non-blocking `tracing-appender` writer.

use crate::config::LogLevel;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Must be kept alive for the lifetime of the process when file logging is
/// enabled; dropping it stops the background flush thread.
pub struct LoggingGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Initialize the global `tracing` subscriber. Call once at process start.
pub fn init(level: LogLevel) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));

    if let Ok(path) = std::env::var("OAUTH_BROKER_LOG_FILE") {
        let path = Path::new(&path);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "broker.log".to_string());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
        LoggingGuard(Some(guard))
    } else {
        let subscriber = tracing_subscriber::fmt().json().with_env_filter(filter).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
        LoggingGuard(None)
    }
}
