//! Logging initialization
//!
//! Structured logging via the tracing ecosystem: console output plus an
//! optional daily-rotated log file. The `TERMDECK_LOG` environment variable
//! overrides the configured filter (e.g. `termdeck=debug,termdeck::pty=trace`).

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingSettings;

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termdeck")
        .join("logs")
}

/// Initialize the logging system. Call once, early in host startup.
pub fn init_logging(settings: &LoggingSettings) {
    let env_filter = EnvFilter::try_from_env("TERMDECK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("termdeck={}", settings.level)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_ansi(true);

    let file_layer = if settings.file_output {
        let log_dir = default_log_dir();
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender =
                    RollingFileAppender::new(Rotation::DAILY, &log_dir, "termdeck.log");
                let layer = fmt::layer()
                    .with_writer(file_appender)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE);
                Some(layer.boxed())
            }
            Err(e) => {
                eprintln!("Warning: failed to create log directory {log_dir:?}: {e}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!("Logging initialized");
}
