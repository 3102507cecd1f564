//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How the process should log.
#[derive(Debug, Clone, Default)]
pub struct LogOptions<'a> {
    pub verbose: bool,
    pub json: bool,
    /// Directory for daily-rolling log files, in addition to stderr.
    pub dir: Option<&'a Path>,
}

/// `RUST_LOG` when it is set and parses, otherwise `debug` or `info`.
pub fn env_filter(verbose: bool) -> EnvFilter {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(directives.as_deref(), verbose)
}

fn filter_from(directives: Option<&str>, verbose: bool) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop and must live as long as the process logs.
pub fn init(options: LogOptions<'_>) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(options.verbose);

    let (file_writer, guard) = match options.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "packflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match (options.json, file_writer) {
        (true, Some(writer)) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_ansi(false).with_writer(writer))
            .try_init(),
        (true, None) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (false, Some(writer)) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .try_init(),
        (false, None) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    result.context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_follows_verbose() {
        assert_eq!(filter_from(None, true).to_string(), "debug");
        assert_eq!(filter_from(None, false).to_string(), "info");
        assert_eq!(filter_from(Some("  "), true).to_string(), "debug");
    }

    #[test]
    fn test_rust_log_directives_win() {
        let filter = filter_from(Some("packflow=trace,axum=warn"), false).to_string();
        assert!(filter.contains("packflow=trace"));
        assert!(filter.contains("axum=warn"));
        assert!(!filter.contains("info"));
    }

    #[test]
    fn test_unparseable_rust_log_falls_back() {
        assert_eq!(filter_from(Some("packflow=loud"), false).to_string(), "info");
    }

    #[test]
    fn test_init_creates_log_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let guard = init(LogOptions {
            verbose: false,
            json: true,
            dir: Some(&logs),
        })
        .unwrap();
        assert!(guard.is_some());
        assert!(logs.is_dir());
        tracing::info!("log file check");
        drop(guard);
        let files: Vec<_> = std::fs::read_dir(&logs).unwrap().collect();
        assert!(!files.is_empty());
    }
}
