//! Configuration loader with layered sources.

use crate::{AppConfig, ConfigError};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loads [`AppConfig`] from a configuration directory plus the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Creates a loader for the given directory.
    ///
    /// Sources are applied in order, later ones overriding earlier ones:
    /// 1. `{dir}/default.toml`
    /// 2. `{dir}/{environment}.toml`
    /// 3. `{dir}/local.toml` (not committed to version control)
    /// 4. Environment variables with the `DOCKET_` prefix and `__` separator
    ///
    /// The environment name comes from `DOCKET_ENVIRONMENT` (default
    /// `development`).
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("DOCKET_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Self {
            config_dir: config_dir.into(),
            environment,
        }
    }

    /// Loader for the default location (`./config`).
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Overrides the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Reads every source and returns the validated configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        info!(
            environment = %self.environment,
            config_dir = %self.config_dir.display(),
            "Loading configuration"
        );

        let mut builder = Config::builder();

        for name in ["default", self.environment.as_str(), "local"] {
            let path = self.config_dir.join(format!("{name}.toml"));
            if Path::new(&path).exists() {
                debug!(path = %path.display(), "Adding configuration file");
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("DOCKET")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.app.environment.clone_from(&self.environment);
        config.validate()?;

        Ok(config)
    }
}
