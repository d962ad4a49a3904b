use serde::Deserialize;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::{
    config::GenericConfiguration,
    error::{ErrorContext as _, GenericError},
    generic_error,
};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Log level filter, in `EnvFilter` directive syntax.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to emit JSON lines instead of the human-readable console format.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub log_format_json: bool,

    /// Whether to write logs to standard output.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub log_to_console: bool,

    /// Path of a file to append logs to, in addition to the console.
    ///
    /// Disabled when empty, which is the default.
    #[serde(default)]
    pub log_file: String,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let logging_config = config.as_typed()?;
        Ok(logging_config)
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: true,
            log_to_console: true,
            log_file: String::new(),
        }
    }
}

/// A log level filter.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(String);

impl LogLevel {
    /// Builds the `EnvFilter` for this level.
    pub fn as_env_filter(&self) -> EnvFilter {
        // Already validated on construction.
        EnvFilter::builder().parse_lossy(&self.0)
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(level.to_string().to_lowercase())
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(&value)
            .map(|_| Self(value))
            .error_context("Failed to parse valid log level.")
    }
}
