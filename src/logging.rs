//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Service** ([`init_json`]): JSON lines on stderr through a non-blocking writer
//! - **CLI** ([`init_cli`]): human-readable output on stderr
//!
//! Both write to stderr so stdout stays free for review responses.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Holds the non-blocking writer guard for JSON logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise JSON logging on stderr.
///
/// Returns a [`LoggingGuard`] that must be kept alive for log flushing.
pub fn init_json(default_level: &str) -> LoggingGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(json_layer)
        .init();

    LoggingGuard { _guard: guard }
}

/// Initialise human-readable logging on stderr.
pub fn init_cli(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}

/// Initialise logging as configured.
///
/// Returns the guard when JSON logging is selected.
pub fn init(config: &LoggingConfig) -> Option<LoggingGuard> {
    match config.format {
        LogFormat::Json => Some(init_json(&config.level)),
        LogFormat::Pretty => {
            init_cli(&config.level);
            None
        }
    }
}
