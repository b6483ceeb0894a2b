use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auto_download: AutoDownloadConfig,
}

/// HTTP server and catalog placement
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Hostname the mirror presents in storage keys and mirror-protocol URLs.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            hostname: default_hostname(),
            catalog_path: default_catalog_path(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_hostname() -> String {
    "registry.terraform.io".to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/catalog")
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    #[default]
    Local,
    Memory,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Root directory for the local backend.
    #[serde(default = "default_blob_path")]
    pub local_path: PathBuf,
    /// Lifetime of presigned download URLs.
    #[serde(default = "default_presign_ttl_hours")]
    pub presign_ttl_hours: u64,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            local_path: default_blob_path(),
            presign_ttl_hours: default_presign_ttl_hours(),
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_bucket() -> String {
    "terracache".to_string()
}

fn default_blob_path() -> PathBuf {
    PathBuf::from("data/blobs")
}

fn default_presign_ttl_hours() -> u64 {
    24
}

/// Upstream origin registry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

fn default_upstream_url() -> String {
    "https://registry.terraform.io".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_request_timeout_seconds() -> u64 {
    60
}

/// Pre-load job processor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// How often the poll loop looks for claimable jobs.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Per-item retry budget at the registry client level.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Graceful drain timeout on shutdown, in seconds.
    #[serde(default = "default_worker_shutdown")]
    pub worker_shutdown: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retry_attempts: default_retry_attempts(),
            worker_shutdown: default_worker_shutdown(),
        }
    }
}

impl ProcessorConfig {
    /// Clamped to at least one second; a zero interval cannot drive a ticker.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval.max(1))
    }

    pub fn worker_shutdown(&self) -> Duration {
        Duration::from_secs(self.worker_shutdown)
    }
}

fn default_polling_interval() -> u64 {
    10
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_worker_shutdown() -> u64 {
    30
}

/// Two-tier response cache
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// L1 cap in megabytes; 0 disables the memory tier.
    #[serde(default = "default_memory_size_mb")]
    pub memory_size_mb: u64,
    #[serde(default = "default_cache_path")]
    pub disk_path: PathBuf,
    /// L2 cap in gigabytes; 0 disables the disk tier.
    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: u64,
    /// Default TTL for cached entries, in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub promote_on_hit: bool,
    #[serde(default = "default_true")]
    pub write_through: bool,
    #[serde(default = "default_memory_sweep_seconds")]
    pub memory_sweep_seconds: u64,
    #[serde(default = "default_disk_sweep_seconds")]
    pub disk_sweep_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_size_mb: default_memory_size_mb(),
            disk_path: default_cache_path(),
            disk_size_gb: default_disk_size_gb(),
            ttl_seconds: default_cache_ttl_seconds(),
            promote_on_hit: true,
            write_through: true,
            memory_sweep_seconds: default_memory_sweep_seconds(),
            disk_sweep_seconds: default_disk_sweep_seconds(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        if self.ttl_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.ttl_seconds))
        }
    }

    pub fn memory_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.memory_sweep_seconds.max(1))
    }

    pub fn disk_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.disk_sweep_seconds.max(1))
    }
}

fn default_memory_size_mb() -> u64 {
    100
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_disk_size_gb() -> u64 {
    10
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_memory_sweep_seconds() -> u64 {
    300
}

fn default_disk_sweep_seconds() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

/// On-demand auto-download coordinator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoDownloadConfig {
    #[serde(default)]
    pub enabled: bool,
    /// When non-empty, only these namespaces may be auto-downloaded.
    #[serde(default)]
    pub allowed_namespaces: Vec<String>,
    #[serde(default)]
    pub blocked_namespaces: Vec<String>,
    /// Sibling platforms fetched in the background after a foreground hit.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
    /// Token-bucket refill rate; 0 disables the gate.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    /// Per-request deadline covering admission and the upstream fetch.
    #[serde(default = "default_download_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub cache_negative_results: bool,
    #[serde(default = "default_negative_cache_ttl_seconds")]
    pub negative_cache_ttl_seconds: u64,
}

impl Default for AutoDownloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_namespaces: Vec::new(),
            blocked_namespaces: Vec::new(),
            platforms: default_platforms(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            timeout_seconds: default_download_timeout_seconds(),
            cache_negative_results: true,
            negative_cache_ttl_seconds: default_negative_cache_ttl_seconds(),
        }
    }
}

impl AutoDownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn negative_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.negative_cache_ttl_seconds as i64)
    }
}

fn default_platforms() -> Vec<String> {
    vec![
        "linux_amd64".to_string(),
        "linux_arm64".to_string(),
        "darwin_amd64".to_string(),
        "darwin_arm64".to_string(),
        "windows_amd64".to_string(),
    ]
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_download_timeout_seconds() -> u64 {
    120
}

fn default_negative_cache_ttl_seconds() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.hostname, "registry.terraform.io");
        assert_eq!(config.processor.polling_interval, 10);
        assert_eq!(config.processor.max_concurrent_jobs, 3);
        assert_eq!(config.processor.retry_attempts, 3);
        assert_eq!(config.processor.worker_shutdown, 30);
        assert_eq!(config.cache.memory_size_mb, 100);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert!(config.cache.promote_on_hit);
        assert!(config.cache.write_through);
        assert!(!config.auto_download.enabled);
        assert_eq!(config.auto_download.rate_limit_per_minute, 60);
        assert_eq!(config.auto_download.max_concurrent_downloads, 3);
        assert_eq!(config.auto_download.negative_cache_ttl_seconds, 300);
    }

    #[test]
    fn zero_ttl_means_no_default_ttl() {
        let mut cache = CacheConfig::default();
        cache.ttl_seconds = 0;
        assert!(cache.default_ttl().is_none());
    }
}
