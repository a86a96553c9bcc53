//! Tracing setup.
//!
//! Two outputs share one filter, read from `HOOKLINE_LOG` (default `warn`,
//! `debug` with `--verbose`):
//! - compact human-readable lines on stderr
//! - JSON lines in `<data_dir>/logs/hookline.<date>.log`, when writable

use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "HOOKLINE_LOG";

/// Keeps the file writer flushing; hold it until exit.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> LoggingGuard {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match log_dir.and_then(file_appender) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    LoggingGuard { _file: guard }
}

fn file_appender(dir: &Path) -> Option<RollingFileAppender> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("hookline: file logging disabled ({}): {}", dir.display(), e);
        return None;
    }
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("hookline")
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| eprintln!("hookline: file logging disabled ({}): {}", dir.display(), e))
        .ok()
}
