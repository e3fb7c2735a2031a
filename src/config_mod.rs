// src/config_mod.rs
// Application configuration: built-in defaults, optional ledgerbook.toml, LEDGERBOOK__* overrides.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "ledgerbook";
pub const ENV_PREFIX: &str = "LEDGERBOOK";

/// Which storage backend to bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Let the selector detect the environment.
    #[default]
    Auto,
    Desktop,
    Mobile,
    ObjectStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendPreference,
    /// SQLite file opened by the desktop host. `:memory:` keeps it in RAM.
    pub database_path: String,
    /// Logical database name for the mobile plugin and the object store.
    pub database_name: String,
    /// Directory the mobile plugin keeps its database files in.
    pub mobile_data_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            database_path: "data/ledgerbook.db".to_string(),
            database_name: "ledgerbook".to_string(),
            mobile_data_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingConfig {
    /// Extra attempts after a document number turns out to be taken.
    pub max_retries: u32,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::sequence_mod::DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub storage: StorageConfig,
    pub numbering: NumberingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "Ledgerbook".to_string(),
            storage: StorageConfig::default(),
            numbering: NumberingConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

impl AppConfig {
    /// Defaults, then the config file (if present), then the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or(DEFAULT_CONFIG_FILE);
        let settings = Self::builder()?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::finish(settings)
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Self::builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::finish(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "app_name must not be empty".to_string(),
            });
        }
        if self.storage.database_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "storage.database_name must not be empty".to_string(),
            });
        }
        if self.storage.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "storage.database_path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn builder() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = AppConfig::default();
        Ok(Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("storage.backend", "auto")?
            .set_default("storage.database_path", defaults.storage.database_path)?
            .set_default("storage.database_name", defaults.storage.database_name)?
            .set_default("numbering.max_retries", i64::from(defaults.numbering.max_retries))?)
    }

    fn finish(settings: Config) -> Result<Self, ConfigError> {
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
