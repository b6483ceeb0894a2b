//! Client for the upstream origin registry.
//!
//! Downloads are two-step: fetch the download metadata document, then fetch
//! the archive itself and verify its SHA-256 against the advertised hash.
//! Transient upstream failures are retried with exponential backoff; a 404
//! fails immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Download metadata for one `(namespace, name, version, os, arch)`.
#[derive(Debug, Clone)]
pub struct DownloadInfo {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    /// Hex SHA-256 as advertised upstream (case preserved).
    pub shasum: String,
    pub protocols: Vec<String>,
    pub shasum_url: Option<String>,
    pub shasum_signature_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadDocument {
    #[serde(default)]
    protocols: Vec<String>,
    filename: String,
    download_url: String,
    shasum: String,
    #[serde(default)]
    shasum_url: Option<String>,
    #[serde(default)]
    shasum_signature_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamPlatform {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamVersion {
    pub version: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<UpstreamPlatform>,
}

#[derive(Debug, Deserialize)]
struct VersionsDocument {
    #[serde(default)]
    versions: Vec<UpstreamVersion>,
}

/// A completed two-step download.
#[derive(Debug)]
pub struct CompletedDownload {
    pub info: DownloadInfo,
    pub data: Bytes,
    pub duration: Duration,
}

pub struct RegistryClient {
    http: Client,
    base_url: String,
    retry_attempts: u32,
    /// Archive bodies fetched successfully (coalescing tests observe this).
    archive_fetches: AtomicU64,
}

impl RegistryClient {
    pub fn new(cfg: &UpstreamConfig, retry_attempts: u32) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
            .timeout(Duration::from_secs(cfg.request_timeout_seconds))
            .user_agent(concat!("terracache/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            retry_attempts: retry_attempts.max(1),
            archive_fetches: AtomicU64::new(0),
        })
    }

    pub fn archive_fetches(&self) -> u64 {
        self.archive_fetches.load(Ordering::Relaxed)
    }

    /// Versions the upstream registry lists for a source address.
    pub async fn list_versions(&self, namespace: &str, name: &str) -> Result<Vec<UpstreamVersion>> {
        let url = format!(
            "{}/v1/providers/{}/{}/versions",
            self.base_url, namespace, name
        );
        let body = self
            .get_with_retries(&url, &format!("{}/{}", namespace, name))
            .await?;
        let document: VersionsDocument = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;
        Ok(document.versions)
    }

    /// Step one: fetch the download metadata document.
    pub async fn download_info(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<DownloadInfo> {
        let url = format!(
            "{}/v1/providers/{}/{}/{}/download/{}/{}",
            self.base_url, namespace, name, version, os, arch
        );
        let what = format!("{}/{} {} {}_{}", namespace, name, version, os, arch);
        let body = self.get_with_retries(&url, &what).await?;
        let document: DownloadDocument = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;

        Ok(DownloadInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
            filename: document.filename,
            download_url: self.absolute_url(&document.download_url),
            shasum: document.shasum,
            protocols: document.protocols,
            shasum_url: document.shasum_url,
            shasum_signature_url: document.shasum_signature_url,
        })
    }

    /// Step two: fetch the archive and verify its hash.
    pub async fn fetch_archive(&self, info: &DownloadInfo) -> Result<Bytes> {
        let what = format!("archive {}", info.filename);
        let data = self.get_with_retries(&info.download_url, &what).await?;
        self.archive_fetches.fetch_add(1, Ordering::Relaxed);

        let actual = hex::encode(Sha256::digest(&data));
        if !actual.eq_ignore_ascii_case(&info.shasum) {
            return Err(RegistryError::ChecksumMismatch {
                expected: info.shasum.to_lowercase(),
                actual,
            });
        }

        debug!(
            filename = %info.filename,
            size = data.len(),
            "Archive downloaded and verified"
        );
        Ok(data)
    }

    /// Both steps combined, reporting total duration.
    pub async fn download(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<CompletedDownload> {
        let started = Instant::now();
        let info = self
            .download_info(namespace, name, version, os, arch)
            .await?;
        let data = self.fetch_archive(&info).await?;
        Ok(CompletedDownload {
            info,
            data,
            duration: started.elapsed(),
        })
    }

    /// GET with retry. A 404 fails immediately; transport errors and other
    /// non-2xx statuses retry with exponential backoff until the attempt
    /// budget runs out.
    async fn get_with_retries(&self, url: &str, what: &str) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.get_once(url, what).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        debug!(url, attempt, "Upstream request succeeded after retry");
                    }
                    return Ok(bytes);
                }
                Err(err @ RegistryError::NotFound(_)) => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.retry_attempts {
                warn!(url, attempt, error = %error, "Upstream request failed after retries");
                return Err(error);
            }

            // 1s, 2s, 4s, ...
            let backoff = backoff_delay(attempt);
            warn!(url, attempt, error = %error, "Upstream request failed, retrying");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn get_once(&self, url: &str, what: &str) -> Result<Bytes> {
        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string();
            return Err(RegistryError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?)
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            url.to_string()
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.saturating_sub(1)))
}
