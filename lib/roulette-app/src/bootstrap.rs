//! Command-line arguments and configuration loading shared by every service binary.

use std::path::PathBuf;

use clap::Args;

use crate::config::{ConfigurationError, ConfigurationLoader, GenericConfiguration, CONFIG_FILE_ENV_VAR, ENV_PREFIX};

/// Arguments common to every service binary.
///
/// Meant to be flattened into the binary's own `clap` parser.
#[derive(Args, Clone, Debug, Default)]
pub struct BootstrapArgs {
    /// Path to a YAML configuration file.
    ///
    /// Values from the environment (`ROULETTE_*`) take precedence over values from the file.
    #[arg(short = 'c', long = "config", env = CONFIG_FILE_ENV_VAR)]
    pub config: Option<PathBuf>,
}

impl BootstrapArgs {
    /// Loads the configuration: the file given by `--config`, if any, then the environment.
    ///
    /// # Errors
    ///
    /// If a configuration file was given but does not exist, an error is returned.
    pub fn load_configuration(&self) -> Result<GenericConfiguration, ConfigurationError> {
        let mut loader = ConfigurationLoader::default();
        if let Some(path) = &self.config {
            loader = loader.from_yaml(path)?;
        }

        Ok(loader.from_environment(ENV_PREFIX)?.into_generic())
    }
}
