//! Logging setup for Crosscast binaries
//!
//! The library only emits `tracing` events; a binary installs the subscriber
//! once at startup, choosing between text, JSON and pretty output.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosscast::logging::{LoggingConfig, LogFormat};
//!
//! // JSON lines on stderr at debug level
//! LoggingConfig::new(LogFormat::Json, "info", true).init();
//!
//! // Or honour CROSSCAST_LOG_FORMAT / CROSSCAST_LOG_LEVEL
//! libcrosscast::logging::init_default();
//! ```

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "CROSSCAST_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "CROSSCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    #[default]
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Minimum level or filter directive (e.g. "info", "libcrosscast=debug")
    pub level: String,
    /// Force debug level
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new(LogFormat::Text, "info", false)
    }
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>, verbose: bool) -> Self {
        Self {
            format,
            level: level.into(),
            verbose,
        }
    }

    /// Read format and level from `CROSSCAST_LOG_FORMAT` and
    /// `CROSSCAST_LOG_LEVEL`, defaulting to text at info level
    pub fn from_env() -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, false)
    }

    /// Filter directive in effect; `RUST_LOG` wins when set
    fn filter(&self) -> EnvFilter {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// Install the global subscriber, writing to stderr
    ///
    /// Returns `false` if a subscriber was already installed, in which case
    /// the existing one stays in place.
    pub fn init(&self) -> bool {
        let filter = self.filter();

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        installed.is_ok()
    }
}

/// Initialize logging from `CROSSCAST_LOG_FORMAT` and `CROSSCAST_LOG_LEVEL`
///
/// # Examples
///
/// ```bash
/// export CROSSCAST_LOG_FORMAT=json
/// export CROSSCAST_LOG_LEVEL=debug
/// cast-post "Hello world"
/// ```
pub fn init_default() -> bool {
    LoggingConfig::from_env().init()
}
