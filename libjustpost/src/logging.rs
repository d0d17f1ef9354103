//! Logging setup shared by the JustPost server and tools
//!
//! Supports text, JSON and pretty output on stderr, filtered through
//! `tracing_subscriber::EnvFilter` so `RUST_LOG` still wins when set.
//!
//! # Examples
//!
//! ```no_run
//! use libjustpost::logging::{LoggingConfig, LogFormat};
//!
//! let config = LoggingConfig::new(LogFormat::Json, "info".to_string(), false);
//! config.init();
//!
//! // Or respect JUSTPOST_LOG_FORMAT / JUSTPOST_LOG_LEVEL
//! libjustpost::logging::init_default();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "JUSTPOST_LOG_FORMAT";
pub const ENV_LOG_LEVEL: &str = "JUSTPOST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain lines, no colors
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line, colored
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

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` forces `debug` unless `RUST_LOG` says otherwise.
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build from `JUSTPOST_LOG_FORMAT` and `JUSTPOST_LOG_LEVEL`, defaulting
    /// to text at `info`.
    pub fn from_env() -> Self {
        let format = std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
        Self::new(format, level, false)
    }

    fn filter(&self) -> EnvFilter {
        let fallback = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    }

    /// Install the global subscriber
    ///
    /// Call once at startup. A second call is ignored with a warning instead
    /// of panicking, which keeps tests that share a process quiet.
    pub fn init(&self) {
        let filter = self.filter();

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
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
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Logging already initialized");
        }
    }
}

/// Initialize logging from the environment.
///
/// ```bash
/// export JUSTPOST_LOG_FORMAT=json
/// export JUSTPOST_LOG_LEVEL=debug
/// justpost-server
/// ```
pub fn init_default() {
    LoggingConfig::from_env().init();
}
