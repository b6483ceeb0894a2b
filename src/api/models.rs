//! Wire types for the two provider protocols and the admin surface.
//!
//! Origin-registry protocol (served at `/v1/providers/...`):
//!
//! ```json
//! {"versions": [{"version": "3.5.0", "protocols": ["5.0"],
//!                "platforms": [{"os": "linux", "arch": "amd64"}]}]}
//! ```
//!
//! Network-mirror protocol (served at `/{hostname}/{namespace}/{name}/...`):
//!
//! ```json
//! {"versions": {"3.5.0": {}}}
//! {"archives": {"linux_amd64": {"url": "...", "hashes": ["zh:6c5d..."]}}}
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::autoload::AutoloadSnapshot;
use crate::cache::CacheStats;
use crate::catalog::{CatalogStats, Job, JobItem, JobStatus};
use crate::humanize::ByteSize;
use crate::observability::ApiMetricsSnapshot;
use crate::processor::ProcessorSnapshot;

/// The hash scheme prefix the mirror protocol expects for SHA-256 sums.
pub const ZH_PREFIX: &str = "zh:";

// ---- origin-registry protocol ----

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceDiscovery {
    #[serde(rename = "providers.v1")]
    pub providers_v1: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub protocols: Vec<String>,
    pub platforms: Vec<PlatformEntry>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformEntry {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasum_url: String,
    pub shasum_signature_url: String,
    pub shasum: String,
    pub signing_keys: SigningKeys,
}

/// Serialized as an object; with no keys configured it renders as `{}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SigningKeys {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
}

// ---- network-mirror protocol ----

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorIndexResponse {
    pub versions: BTreeMap<String, MirrorVersion>,
}

/// Deliberately empty: the mirror index maps versions to `{}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MirrorVersion {}

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorPackagesResponse {
    pub archives: BTreeMap<String, MirrorArchive>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorArchive {
    pub url: String,
    pub hashes: Vec<String>,
}

// ---- shared ----

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}

// ---- admin surface ----

#[derive(Debug, Serialize, Deserialize)]
pub struct DefinitionsLoadedResponse {
    pub job_id: u64,
    pub providers: usize,
    pub total_items: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: u64,
    pub job_type: String,
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub progress_pct: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<JobItem>>,
}

impl JobView {
    pub fn from_job(job: Job, items: Option<Vec<JobItem>>) -> Self {
        let progress_pct = job.progress_pct();
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            total: job.total,
            completed: job.completed,
            failed: job.failed,
            progress_pct,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize)]
pub struct ProviderListResponse {
    pub providers: Vec<crate::catalog::ProviderRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct FlagsRequest {
    #[serde(default)]
    pub deprecated: Option<bool>,
    #[serde(default)]
    pub blocked: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub job_id: u64,
    pub reset_items: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub auto_download: AutoloadSnapshot,
    pub processor: ProcessorSnapshot,
    pub catalog: CatalogStats,
    pub api: ApiMetricsSnapshot,
    pub totals: StatsTotals,
}

/// Human-readable rollups for operators.
#[derive(Debug, Serialize)]
pub struct StatsTotals {
    pub cache_size: ByteSize,
    pub cache_capacity: ByteSize,
    pub bytes_downloaded: ByteSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_discovery_field_name() {
        let json = serde_json::to_string(&ServiceDiscovery {
            providers_v1: "/v1/providers/".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"providers.v1":"/v1/providers/"}"#);
    }

    #[test]
    fn mirror_index_versions_map_to_empty_objects() {
        let mut versions = BTreeMap::new();
        versions.insert("3.5.0".to_string(), MirrorVersion::default());
        let json = serde_json::to_string(&MirrorIndexResponse { versions }).unwrap();
        assert_eq!(json, r#"{"versions":{"3.5.0":{}}}"#);
    }

    #[test]
    fn empty_signing_keys_serialize_as_empty_object() {
        let json = serde_json::to_string(&SigningKeys::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn mirror_archive_shape() {
        let mut archives = BTreeMap::new();
        archives.insert(
            "linux_amd64".to_string(),
            MirrorArchive {
                url: "/blobs/x".to_string(),
                hashes: vec![format!("{}{}", ZH_PREFIX, "ab".repeat(32))],
            },
        );
        let json = serde_json::to_value(&MirrorPackagesResponse { archives }).unwrap();
        assert!(json["archives"]["linux_amd64"]["hashes"][0]
            .as_str()
            .unwrap()
            .starts_with("zh:"));
    }
}
