//! Tracing configuration, log routing, and the append-only error log.
//!
//! The application logs to stdout using a compact formatter, and to a file. When
//! `CHROMA_GATEWAY_LOG_FILE` is set, logs are appended to that path; otherwise a file logger is
//! created under `logs/chroma-gateway.log`. A non‑blocking writer is used to minimize contention
//! on hot paths.
//!
//! Separately, every error returned to a client is appended to an [`ErrorLog`] file as a
//! timestamp line followed by a JSON line.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use time::OffsetDateTime;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const ERROR_TIMESTAMP_FORMAT: &str = "[day].[month].[year] [hour]:[minute]:[second]";

/// Configure tracing subscribers for stdout and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Installs a compact stdout layer and, when available, a file layer.
/// - Uses a global guard to keep the non‑blocking writer alive for the process lifetime.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Build a non‑blocking writer for file logging.
///
/// Returns `None` when the logs directory cannot be created or the target file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    if let Ok(path) = std::env::var("CHROMA_GATEWAY_LOG_FILE") {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let _ = LOG_GUARD.set(guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        }
    } else {
        if let Err(err) = std::fs::create_dir_all("logs") {
            eprintln!("Failed to create logs directory: {err}");
            return None;
        }
        let file_appender = tracing_appender::rolling::never("logs", "chroma-gateway.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(non_blocking)
    }
}

/// Append-only file recording every error surfaced to API clients.
///
/// Each entry is a `dd.mm.YYYY HH:MM:SS` line (UTC), a JSON line `{"error": "..."}`, and a
/// blank separator line. Write failures are reported through `tracing` and otherwise ignored.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Create an error log that appends to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry for `message`.
    pub fn record(&self, message: &str) {
        tracing::error!(error = message, "Request failed");
        let entry = format_entry(OffsetDateTime::now_utc(), message);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(entry.as_bytes()));
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to append to error log");
        }
    }
}

fn format_entry(at: OffsetDateTime, message: &str) -> String {
    let timestamp = time::format_description::parse(ERROR_TIMESTAMP_FORMAT)
        .ok()
        .and_then(|format| at.format(&format).ok())
        .unwrap_or_else(|| at.unix_timestamp().to_string());
    let body = serde_json::json!({ "error": message });
    format!("{timestamp}\n{body}\n\n")
}
