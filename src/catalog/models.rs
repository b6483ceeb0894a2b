//! Catalog row types: providers, jobs, and job items.
//!
//! A provider row exists for every archive held in the mirror, keyed by the
//! four-part identity `(namespace, name, version, platform)`. Jobs and their
//! items track batched pre-load downloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four-part identity that uniquely names a provider archive.
///
/// `platform` is the combined `{os}_{arch}` string (e.g. `linux_amd64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub platform: String,
}

impl ProviderIdentity {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            platform: platform.into(),
        }
    }

    /// Build an identity from separate os/arch parts.
    pub fn for_platform(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        os: &str,
        arch: &str,
    ) -> Self {
        Self::new(namespace, name, version, format!("{}_{}", os, arch))
    }

    /// Canonical key string, also used as the catalog partition key.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.namespace, self.name, self.version, self.platform
        )
    }

    /// Split the platform string into `(os, arch)`.
    pub fn os_arch(&self) -> Option<(&str, &str)> {
        self.platform.split_once('_')
    }
}

impl std::fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A mirrored provider archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    #[serde(flatten)]
    pub identity: ProviderIdentity,
    pub filename: String,
    /// Lowercase hex SHA-256 of the archive bytes.
    pub shasum: String,
    pub storage_key: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub protocols: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A batch of download items, claimed and driven by a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub job_type: String,
    pub status: JobStatus,
    pub total: usize,
    /// Items that finished without failure (downloaded or already present).
    pub completed: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn progress_pct(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (((self.completed + self.failed) * 100) / self.total) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Skipped,
}

/// One download unit within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub job_id: u64,
    pub seq: u32,
    #[serde(flatten)]
    pub identity: ProviderIdentity,
    pub status: ItemStatus,
    pub retries: u32,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_is_canonical() {
        let id = ProviderIdentity::new("hashicorp", "random", "3.5.0", "linux_amd64");
        assert_eq!(id.key(), "hashicorp/random/3.5.0/linux_amd64");
        assert_eq!(id.os_arch(), Some(("linux", "amd64")));
    }

    #[test]
    fn identity_from_os_arch() {
        let id = ProviderIdentity::for_platform("hashicorp", "aws", "5.0.1", "darwin", "arm64");
        assert_eq!(id.platform, "darwin_arm64");
    }

    #[test]
    fn progress_handles_empty_job() {
        let now = Utc::now();
        let job = Job {
            id: 1,
            job_type: "preload".to_string(),
            status: JobStatus::Completed,
            total: 0,
            completed: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        assert_eq!(job.progress_pct(), 100);
    }

    #[test]
    fn progress_counts_failures() {
        let now = Utc::now();
        let job = Job {
            id: 1,
            job_type: "preload".to_string(),
            status: JobStatus::Running,
            total: 4,
            completed: 1,
            failed: 1,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            finished_at: None,
        };
        assert_eq!(job.progress_pct(), 50);
    }
}
