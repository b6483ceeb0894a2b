//! Configuration management for terracache
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the
//! pattern `TERRACACHE__<section>__<key>`:
//!
//! - `TERRACACHE__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `TERRACACHE__AUTO_DOWNLOAD__ENABLED=true`
//! - `TERRACACHE__STORAGE__PROVIDER=s3`
//!
//! By default the configuration file is `config/terracache.toml`; override
//! with the `TERRACACHE_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    AutoDownloadConfig, CacheConfig, Config, ProcessorConfig, ServerConfig, StorageConfig,
    StorageProvider, UpstreamConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[auto_download]
enabled = true
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert!(config.auto_download.enabled);
        assert_eq!(config.server.hostname, "registry.terraform.io");
    }

    #[test]
    fn validation_catches_conflicting_lists() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[auto_download]
allowed_namespaces = ["hashicorp"]
blocked_namespaces = ["hashicorp"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ConflictingNamespaceLists(_))
        ));
    }
}
