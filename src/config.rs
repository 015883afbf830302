//! Configuration for identity-mapping

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MappingError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("identity-mapping")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Divisor for the approximate per-owner batch count
    #[serde(default = "default_average_rows_per_owner")]
    pub average_rows_per_owner: u32,

    /// Upper bound on a batch page
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,

    /// Permit wiping every table. Never enable in production.
    #[serde(default)]
    pub allow_reset: bool,
}

fn default_database_file() -> String {
    "mappings.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_average_rows_per_owner() -> u32 {
    4
}

fn default_max_page_size() -> i64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            average_rows_per_owner: default_average_rows_per_owner(),
            max_page_size: default_max_page_size(),
            allow_reset: false,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MappingError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| MappingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MappingError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| MappingError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        if self.average_rows_per_owner == 0 {
            return Err(MappingError::Config(
                "average_rows_per_owner must be at least 1".into(),
            ));
        }
        if self.max_page_size < 1 {
            return Err(MappingError::Config("max_page_size must be at least 1".into()));
        }
        if self.database_file.is_empty() {
            return Err(MappingError::Config("database_file must not be empty".into()));
        }
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
