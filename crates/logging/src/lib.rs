//! Logging for the benchmark worker
//!
//! Installs the global `tracing` subscriber: human-readable or JSON output on
//! stderr, an optional daily-rolling log file, and an `EnvFilter` that honours
//! `RUST_LOG` over the configured level.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use common::error::{Error, Result};
use worker_config::LogConfig;

/// Keeps the non-blocking file writer flushing; drop it on exit
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber
///
/// Fails if a subscriber has already been installed for this process.
pub fn init(settings: &LogConfig) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_directive()));

    let (file_writer, file_guard) = match &settings.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(path)?);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let text_layer = (!settings.json).then(|| fmt::layer().with_target(true).with_writer(std::io::stderr));
    let json_layer = settings.json.then(|| fmt::layer().json().with_target(true).with_writer(std::io::stderr));
    let file_layer = file_writer.map(|writer| fmt::layer().with_ansi(false).with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(LogGuard { _file: file_guard })
}

fn rolling_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Log file path '{}' has no file name", path.display())))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)?;

    Ok(tracing_appender::rolling::daily(directory, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_path_without_file_name() {
        assert!(rolling_appender(Path::new("/")).is_err());
    }

    #[test]
    fn test_init_writes_file_and_refuses_second_init() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogConfig {
            file: Some(dir.path().join("logs").join("worker.log")),
            ..Default::default()
        };

        let guard = init(&settings).unwrap();
        tracing::info!("logging initialized for test");
        assert!(init(&LogConfig::default()).is_err());
        drop(guard);

        let entries = std::fs::read_dir(dir.path().join("logs")).unwrap().count();
        assert!(entries >= 1);
    }
}
