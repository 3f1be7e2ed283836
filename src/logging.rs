//! Logging setup.
//!
//! - Console output on stdout, filtered by `RUST_LOG` (default `info`, or
//!   `warn` with `quiet=1`)
//! - Optionally also writes `logs/rust-dso.log`, truncated at startup

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "rust-dso.log";

/// Keeps the file writer alive; dropping it flushes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(quiet: bool) -> &'static str {
    if quiet { "warn" } else { "info" }
}

/// Create `dir` if needed and truncate `file` inside it.
fn prepare_log_file(dir: &Path, file: &str) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(file), "")
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logging(quiet: bool, log_to_file: bool) -> io::Result<LoggingGuard> {
    let (file_layer, file_guard) = if log_to_file {
        prepare_log_file(Path::new(LOG_DIR), LOG_FILE)?;
        let appender = tracing_appender::rolling::never(LOG_DIR, LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(quiet)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_quiet_raises_default_level() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "warn");
    }

    #[test]
    fn test_prepare_truncates_existing_log() {
        // The global subscriber can only be installed once per process, so only
        // the file handling is exercised here.
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("logs");
        prepare_log_file(&dir, LOG_FILE).unwrap();
        fs::write(dir.join(LOG_FILE), "old run").unwrap();
        prepare_log_file(&dir, LOG_FILE).unwrap();
        assert_eq!(fs::read_to_string(dir.join(LOG_FILE)).unwrap(), "");
    }
}
