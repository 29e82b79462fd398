//! Logging configuration and initialization
//!
//! Console output (compact or JSON) plus optional file output through a
//! non-blocking `tracing-appender` writer.

use std::path::PathBuf;

use thiserror::Error;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

/// Filter directive variable, checked before `RUST_LOG`
pub const LOG_ENV: &str = "IMMERSIVE_FILTERS_LOG";
/// Set to `json` for JSON console output
pub const LOG_FORMAT_ENV: &str = "IMMERSIVE_FILTERS_LOG_FORMAT";

const DEFAULT_LOG_FILE: &str = "immersive-filters.log";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable console output (default: true)
    pub console_enabled: bool,
    /// Also write to `file_path` (default: false)
    pub file_enabled: bool,
    /// Log file, `immersive-filters.log` in the working directory when unset
    pub file_path: Option<PathBuf>,
    /// JSON console output (default: false)
    pub json_format: bool,
    /// Filter used when neither environment variable is set (default: "info")
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

/// `IMMERSIVE_FILTERS_LOG`, then `RUST_LOG`, then `default_level`
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn wants_json(format_var: Option<&str>, default: bool) -> bool {
    format_var.map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(default)
}

/// Install the global subscriber.
///
/// Returns a guard when file logging is enabled; keep it alive until exit so
/// buffered lines are flushed.
///
/// ```no_run
/// use immersive_filters::telemetry::{init_logging, LogConfig};
///
/// let _guard = init_logging(&LogConfig::default()).expect("logging");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<Option<LogGuard>, LogError> {
    let format_var = std::env::var(LOG_FORMAT_ENV).ok();
    let use_json = wants_json(format_var.as_deref(), config.json_format);

    let (file_layer, guard) = if config.file_enabled {
        let path = config
            .file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
        let file = std::fs::File::create(&path).map_err(|source| LogError::File { path, source })?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let (json_layer, compact_layer) = match (config.console_enabled, use_json) {
        (false, _) => (None, None),
        (true, true) => (
            Some(fmt::layer().json().with_target(true).with_file(true).with_line_number(true)),
            None,
        ),
        (true, false) => (None, Some(fmt::layer().with_target(true).compact())),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.default_level))
        .with(file_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(guard)
}
