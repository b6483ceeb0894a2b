use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "TERRACACHE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/terracache.toml";
const ENV_PREFIX: &str = "TERRACACHE";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// Load S3 credentials from environment variables.
/// Secrets are never stored in TOML files, only in environment.
fn load_secrets(config: &mut Config) {
    if let Ok(access_key) = env::var("S3_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("S3_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }

    // Alternative: AWS-style environment variable names
    if config.storage.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.storage.access_key = Some(access_key);
        }
    }
    if config.storage.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.storage.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path and the environment.
/// Useful for testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // TERRACACHE__PROCESSOR__POLLING_INTERVAL -> processor.polling_interval
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert!(!config.auto_download.enabled);
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
hostname = "mirror.example.com"

[processor]
polling_interval = 2
max_concurrent_jobs = 5

[auto_download]
enabled = true
allowed_namespaces = ["hashicorp"]
rate_limit_per_minute = 30
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.hostname, "mirror.example.com");
        assert_eq!(config.processor.polling_interval, 2);
        assert_eq!(config.processor.max_concurrent_jobs, 5);
        assert!(config.auto_download.enabled);
        assert_eq!(config.auto_download.allowed_namespaces, vec!["hashicorp"]);
        assert_eq!(config.auto_download.rate_limit_per_minute, 30);
    }

    #[test]
    fn full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
hostname = "registry.terraform.io"
catalog_path = "data/catalog"

[storage]
provider = "s3"
bucket = "terracache-archives"
region = "us-east-1"
presign_ttl_hours = 12

[upstream]
url = "https://registry.terraform.io"

[processor]
polling_interval = 10
max_concurrent_jobs = 3
retry_attempts = 3
worker_shutdown = 30

[cache]
memory_size_mb = 64
disk_path = "data/cache"
disk_size_gb = 5
ttl_seconds = 1800
write_through = false

[auto_download]
enabled = true
platforms = ["linux_amd64", "darwin_arm64"]
max_concurrent_downloads = 2
timeout_seconds = 90
cache_negative_results = true
negative_cache_ttl_seconds = 120
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.storage.bucket, "terracache-archives");
        assert_eq!(config.storage.presign_ttl_hours, 12);
        assert_eq!(config.cache.memory_size_mb, 64);
        assert!(!config.cache.write_through);
        assert_eq!(
            config.auto_download.platforms,
            vec!["linux_amd64", "darwin_arm64"]
        );
        assert_eq!(config.auto_download.timeout_seconds, 90);
    }
}
