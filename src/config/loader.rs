//! # Configuration Loader
//!
//! Environment-aware configuration loading. Compiled-in defaults are the
//! base layer; an optional `config/<environment>.toml` file and
//! `AEGIS_`-prefixed environment variables are merged on top, in that
//! order. `AEGIS__` double-underscore separators address nested fields,
//! e.g. `AEGIS__CIRCUIT_BREAKER__FAILURE_THRESHOLD=3`.

use super::AegisConfig;
use crate::error::{AegisError, Result};
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Loads and merges [`AegisConfig`] layers.
pub struct ConfigLoader {
    config_directory: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Loader with environment auto-detection and the default `config/`
    /// directory.
    pub fn new() -> Self {
        Self {
            config_directory: PathBuf::from("config"),
            environment: Self::detect_environment(),
        }
    }

    /// Loader for an explicit directory and environment. Useful for tests
    /// that must not touch process environment variables.
    pub fn with_environment(config_dir: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            config_directory: config_dir.into(),
            environment: environment.into(),
        }
    }

    /// Detected runtime environment (`AEGIS_ENV`, then `APP_ENV`, then
    /// `development`).
    pub fn detect_environment() -> String {
        env::var("AEGIS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Load the merged configuration and validate it.
    pub fn load(&self) -> Result<AegisConfig> {
        let defaults = Config::try_from(&AegisConfig::default()).map_err(|e| {
            AegisError::ConfigurationError(format!("failed to encode defaults: {e}"))
        })?;

        let mut builder = Config::builder().add_source(defaults);

        let file = self.environment_file();
        if file.exists() {
            debug!(
                environment = %self.environment,
                file = %file.display(),
                "Loading environment configuration file"
            );
            builder = builder.add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        } else {
            debug!(
                environment = %self.environment,
                "No environment configuration file; using defaults"
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("AEGIS")
                .separator("__")
                .try_parsing(true),
        );

        let config: AegisConfig = builder
            .build()
            .map_err(|e| AegisError::ConfigurationError(format!("merge failed: {e}")))?
            .try_deserialize()
            .map_err(|e| AegisError::ConfigurationError(format!("deserialize failed: {e}")))?;

        config.validate().map_err(AegisError::ConfigurationError)?;

        Ok(config)
    }

    /// Load, falling back to compiled-in defaults when loading fails.
    ///
    /// The fallback keeps the process alive on a malformed override file;
    /// the error is logged so an operator can fix the file.
    pub fn load_or_default(&self) -> AegisConfig {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Configuration loading failed, using safe defaults");
                AegisConfig::default()
            }
        }
    }

    fn environment_file(&self) -> PathBuf {
        Path::new(&self.config_directory).join(format!("{}.toml", self.environment))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
