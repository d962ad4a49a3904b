//! Configuration loading.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::{Path, PathBuf},
    sync::Arc,
};

use figment::{
    error::Kind,
    providers::{Env, Format as _, Yaml},
    Figment,
};
use roulette_core::trace::propagation::ExtractionStyles;
use serde::Deserialize;
use snafu::Snafu;

/// Prefix for all environment variables that configure the services.
pub const ENV_PREFIX: &str = "ROULETTE_";

/// Environment variable pointing to an optional YAML configuration file.
pub const CONFIG_FILE_ENV_VAR: &str = "ROULETTE_CONFIG";

/// Default port the services listen on.
pub const DEFAULT_PORT: u16 = 8080;

/// Configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Configuration file does not exist.
    #[snafu(display("Configuration file '{}' does not exist.", path.display()))]
    MissingFile {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A field had the wrong data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Any other configuration error.
    #[snafu(display("Failed to load configuration: {}", source))]
    Generic {
        /// Underlying error.
        source: figment::Error,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Generic { source: e },
        }
    }
}

/// Loads configuration from a YAML file and the environment.
///
/// Sources added later take precedence over sources added earlier, so the usual order is file first, then
/// environment.
#[derive(Default)]
pub struct ConfigurationLoader {
    figment: Figment,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file does not exist, an error is returned. Parse errors surface when the configuration is deserialized.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigurationError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        self.figment = self.figment.merge(Yaml::file(path));
        Ok(self)
    }

    /// Loads the given YAML configuration file if it exists, ignoring it otherwise.
    pub fn try_from_yaml<P>(self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if path.is_file() {
            Self {
                figment: self.figment.merge(Yaml::file(path)),
            }
        } else {
            tracing::debug!(file_path = %path.display(), "Configuration file not found. Ignoring.");
            self
        }
    }

    /// Loads configuration from environment variables with the given prefix.
    ///
    /// An underscore is appended to the prefix if it doesn't already end with one. Keys are lowercased after the prefix
    /// is stripped, so `ROULETTE_LISTEN_ADDRESS` maps to `listen_address`.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        self.figment = self.figment.merge(Env::prefixed(&prefix));
        Ok(self)
    }

    /// Consumes the loader and returns the merged configuration.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration {
            figment: Arc::new(self.figment),
        }
    }
}

/// Merged configuration data, queried by each component for the parts it cares about.
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    figment: Arc<Figment>,
}

impl GenericConfiguration {
    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `T`, an error is returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        Ok(self.figment.extract()?)
    }

    /// Gets a single value by key, if present.
    ///
    /// # Errors
    ///
    /// If the value exists but cannot be deserialized as `T`, an error is returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.figment.extract_inner(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if matches!(e.kind, Kind::MissingField(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

const fn default_listen_address() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

/// Server configuration shared by every service implementation.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfiguration {
    /// Address to listen on.
    ///
    /// Defaults to `0.0.0.0:8080`.
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Trace context propagation styles to extract from inbound requests, in order of precedence.
    ///
    /// Defaults to `datadog,tracecontext`.
    #[serde(default)]
    pub propagation_style_extract: ExtractionStyles,
}

impl ServerConfiguration {
    /// Creates a new `ServerConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `ServerConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }
}
