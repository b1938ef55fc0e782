//! Logging initialization.
//!
//! Every Roster process writes structured JSONL to `~/.roster/logs/roster.jsonl`
//! and can mirror compact lines to stderr. `RUST_LOG` overrides the default
//! level.

use crate::{CoreError, CoreResult, Paths};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, attached to the startup line.
    pub service_name: String,
    /// Default log level filter; `RUST_LOG` wins when set.
    pub default_level: String,
    /// JSONL file path. `None` disables the file layer.
    pub log_path: Option<PathBuf>,
    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "roster".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Appending file writer shared by every event.
#[derive(Clone)]
struct FileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl FileWriter {
    fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        // One event per write; flush so concurrent readers see whole lines.
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with the default file location and stderr output.
///
/// # Example
///
/// ```ignore
/// init_logging("info")?;
/// tracing::info!("roster started");
/// ```
pub fn init_logging(level: &str) -> CoreResult<()> {
    let paths = Paths::new()?;
    init_logging_with(LogConfig {
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
        ..Default::default()
    })
}

/// Initialize logging with a custom configuration.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging_with(config: LogConfig) -> CoreResult<()> {
    let file_layer = match &config.log_path {
        Some(path) => {
            let writer = FileWriter::open(path).map_err(|source| CoreError::Write {
                path: path.clone(),
                source,
            })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = ?config.log_path,
            "logging initialized"
        );
    }
    Ok(())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
