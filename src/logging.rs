//! Log setup for the ingestion server and the upload CLI.
//!
//! The server records every batch, retry and index call, so it logs to stdout and to a file:
//! the path in `RULEBOOK_LOG_FILE` (appended) or `logs/rulebook-ingest.log`. The upload CLI
//! draws its own progress line and logs to stdout only, at `warn` unless `-v` is passed.
//! `RUST_LOG` overrides the level for both.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "RULEBOOK_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "rulebook-ingest.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the server log file goes.
#[derive(Debug, PartialEq, Eq)]
enum LogTarget {
    /// Append to an operator-chosen file.
    Append(PathBuf),
    /// `logs/rulebook-ingest.log` under the working directory.
    Default,
}

fn log_target(configured: Option<String>) -> LogTarget {
    match configured {
        Some(path) if !path.trim().is_empty() => LogTarget::Append(PathBuf::from(path.trim())),
        _ => LogTarget::Default,
    }
}

/// Install the server subscriber: compact stdout plus the log file when it can be opened.
pub fn init_tracing() {
    let registry = tracing_subscriber::registry()
        .with(level_filter("info"))
        .with(fmt::layer().with_target(false).compact());

    match open_log_file(log_target(std::env::var(LOG_FILE_ENV).ok())) {
        Some(writer) => registry
            .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
            .init(),
        None => registry.init(),
    }
}

/// Install the upload CLI subscriber; `verbose` lowers the default level to `debug`.
pub fn init_cli_tracing(verbose: bool) {
    tracing_subscriber::registry()
        .with(level_filter(if verbose { "debug" } else { "warn" }))
        .with(fmt::layer().with_target(false).compact())
        .init();
}

fn level_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// The server keeps running on stdout alone if the file cannot be opened.
fn open_log_file(target: LogTarget) -> Option<NonBlocking> {
    let (writer, guard) = match target {
        LogTarget::Append(path) => {
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(file) => tracing_appender::non_blocking(file),
                Err(err) => {
                    eprintln!("Cannot open rulebook log {}: {err}", path.display());
                    return None;
                }
            }
        }
        LogTarget::Default => {
            if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Cannot create {DEFAULT_LOG_DIR}/ for the rulebook log: {err}");
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                DEFAULT_LOG_DIR,
                DEFAULT_LOG_NAME,
            ))
        }
    };
    let _ = FILE_GUARD.set(guard);
    Some(writer)
}
