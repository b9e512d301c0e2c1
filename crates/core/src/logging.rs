//! Logging setup for applications embedding quarry.
//!
//! The library only emits `tracing` events and spans; it never installs a
//! subscriber on its own. Hosts that have no subscriber of their own can call
//! [`init_logging`].
//!
//! # Environment Variables
//!
//! - `QUARRY_LOG`: Filter directive (like `RUST_LOG`), e.g., `quarry_store=debug`
//! - `QUARRY_LOG_FORMAT`: Output format for stderr: `pretty`, `json`, `compact`
//! - `QUARRY_LOG_DIR`: Directory for daily rotated JSON log files
//!
//! # Example
//!
//! ```no_run
//! use quarry_core::logging::{self, LoggingConfig, LogFormat};
//!
//! logging::init_logging(Some(LoggingConfig::new().with_level("debug").with_format(LogFormat::Compact)))?;
//! # Ok::<(), quarry_core::Error>(())
//! ```

use crate::Error;
use crate::config::{FileLoggingConfig, LoggingConfig as ConfigLoggingConfig};
use std::env;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format for stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Pretty, human-readable output with colors (default for TTY)
    #[default]
    Pretty,
    /// JSON output (one line per event)
    Json,
    /// Compact, single-line output
    Compact,
}

impl LogFormat {
    /// All available log formats.
    pub const VALUES: &[LogFormat] = &[LogFormat::Pretty, LogFormat::Json, LogFormat::Compact];

    /// Parse a log format from a string.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }

    /// Get the string representation of this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

/// Logging configuration wrapper that bridges config and logging modules.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level for stderr output.
    pub level: String,
    /// Output format for stderr.
    pub format: LogFormat,
    /// File logging configuration (optional).
    pub file: Option<FileLoggingConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: LogFormat::default(), file: None }
    }
}

impl From<ConfigLoggingConfig> for LoggingConfig {
    fn from(config: ConfigLoggingConfig) -> Self {
        let format = LogFormat::parse_str(&config.format).unwrap_or_default();

        Self { level: config.level, format, file: if config.file.enabled { Some(config.file) } else { None } }
    }
}

impl LoggingConfig {
    /// Create a new logging config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable file logging.
    pub fn with_file_logging(mut self, config: FileLoggingConfig) -> Self {
        self.file = Some(config);
        self
    }

    /// Build an EnvFilter from this config and environment variables.
    fn build_env_filter(&self) -> EnvFilter {
        let filter = env::var("QUARRY_LOG")
            .ok()
            .or_else(|| env::var("RUST_LOG").ok())
            .unwrap_or_else(|| self.level.clone());

        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Detect if stderr is a TTY for pretty formatting.
    fn is_tty() -> bool {
        atty::is(atty::Stream::Stderr)
    }

    /// Determine the appropriate format for stderr output.
    fn detect_format(&self) -> LogFormat {
        if let Ok(fmt_str) = env::var("QUARRY_LOG_FORMAT")
            && let Some(fmt) = LogFormat::parse_str(&fmt_str)
        {
            return fmt;
        }

        if self.format == LogFormat::Pretty && !Self::is_tty() { LogFormat::Compact } else { self.format }
    }

    /// Get the log directory path.
    fn log_dir(file: &FileLoggingConfig) -> Result<PathBuf, Error> {
        if let Ok(custom_dir) = env::var("QUARRY_LOG_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }

        if let Some(dir) = &file.directory {
            return Ok(PathBuf::from(dir));
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;

        Ok(PathBuf::from(home).join(".quarry").join("logs"))
    }
}

/// Initialize the tracing subscriber with the given configuration.
///
/// This function sets up the global tracing subscriber with:
/// - Environment-based filter (from `QUARRY_LOG` or `RUST_LOG`)
/// - Formatted stderr output (pretty, json, or compact)
/// - Optional daily rotated JSON file output
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<(), Error> {
    let config = config.unwrap_or_default();
    let env_filter = config.build_env_filter();
    let format = config.detect_format();

    let registry = Registry::default().with(env_filter);

    let result = if let Some(file_config) = &config.file {
        let log_dir = LoggingConfig::log_dir(file_config)?;
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| Error::Config(format!("Failed to create log directory: {}", e)))?;

        // The appender writes synchronously so no worker guard has to outlive this call.
        let file_appender = tracing_appender::rolling::daily(log_dir, "quarry.log");

        match format {
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(io::stderr).with_ansi(true))
                .with(fmt::layer().json().with_writer(file_appender))
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(io::stderr))
                .with(fmt::layer().json().with_writer(file_appender))
                .try_init(),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .with(fmt::layer().json().with_writer(file_appender))
                .try_init(),
        }
    } else {
        match format {
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(io::stderr).with_ansi(true))
                .try_init(),
            LogFormat::Json => registry.with(fmt::layer().json().with_writer(io::stderr)).try_init(),
            LogFormat::Compact => registry.with(fmt::layer().compact().with_writer(io::stderr)).try_init(),
        }
    };

    result.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Sanitize file paths for logging (replace the home directory with `~`).
pub fn sanitize_path(path: &std::path::Path) -> String {
    if let Ok(home) = env::var("HOME")
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        return format!("~/{}", stripped.display());
    }

    path.display().to_string()
}
