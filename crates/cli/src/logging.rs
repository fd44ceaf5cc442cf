//! Process-wide tracing setup.
//!
//! Logs go to stderr, and optionally to a file through a non-blocking
//! writer. The returned guard must live until the process exits; dropping it
//! flushes the file writer.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// The filter comes from `cli_level` if given, else `RUST_LOG`, else
/// `config_level`.
pub fn init(
    cli_level: Option<&str>,
    config_level: &str,
    file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level '{level}'"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config_level)),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_appender(path)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

fn open_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    Ok(tracing_appender::rolling::never(dir, file_name))
}
