use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::{CatalogError, Result};
use super::models::{ItemStatus, Job, JobItem, JobStatus, ProviderIdentity, ProviderRecord};
use super::partitions::{
    encode_item_key, encode_item_prefix, encode_job_key, encode_meta_key,
    encode_provider_id_key, encode_provider_key, encode_source_prefix, encode_version_prefix,
};

const META_NEXT_JOB_SEQ: &str = "next_job_seq";

/// Filter and pagination for admin provider listings.
#[derive(Debug, Clone, Default)]
pub struct ProviderFilter {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogStats {
    pub providers: usize,
    pub jobs: usize,
    pub job_items: usize,
}

/// Fjall-backed catalog of providers, jobs, and job items.
///
/// Reads go straight to the partitions. All job/item/provider mutation takes
/// the internal write lock, which is the serialization point that makes the
/// pending->running claim atomic and keeps counter updates from interleaving.
#[derive(Clone)]
pub struct CatalogStore {
    keyspace: Keyspace,
    providers: PartitionHandle,
    provider_ids: PartitionHandle,
    jobs: PartitionHandle,
    items: PartitionHandle,
    meta: PartitionHandle,
    write_lock: Arc<Mutex<()>>,
    job_seq: Arc<AtomicU64>,
}

impl CatalogStore {
    /// Open or create a catalog at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening catalog");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let providers = keyspace.open_partition("providers", PartitionCreateOptions::default())?;
        let provider_ids =
            keyspace.open_partition("provider_ids", PartitionCreateOptions::default())?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let items = keyspace.open_partition("job_items", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        let next_seq = meta
            .get(encode_meta_key(META_NEXT_JOB_SEQ))?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(1);

        info!(next_job_seq = next_seq, "Catalog opened");

        Ok(Self {
            keyspace,
            providers,
            provider_ids,
            jobs,
            items,
            meta,
            write_lock: Arc::new(Mutex::new(())),
            job_seq: Arc::new(AtomicU64::new(next_seq)),
        })
    }

    // ---- providers ----

    pub fn lookup_provider(&self, identity: &ProviderIdentity) -> Result<Option<ProviderRecord>> {
        match self.providers.get(encode_provider_key(identity))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn get_provider_by_id(&self, id: &str) -> Result<Option<ProviderRecord>> {
        let Some(key) = self.provider_ids.get(encode_provider_id_key(id))? else {
            return Ok(None);
        };
        match self.providers.get(key.as_ref())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Distinct versions for a source address, newest-first by semver.
    pub fn list_versions(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        let rows = self.list_source_rows(namespace, name)?;
        let mut versions: Vec<String> = Vec::new();
        for row in rows {
            if !versions.contains(&row.identity.version) {
                versions.push(row.identity.version);
            }
        }
        sort_versions(&mut versions);
        Ok(versions)
    }

    /// Every platform row for one source address.
    pub fn list_source_rows(&self, namespace: &str, name: &str) -> Result<Vec<ProviderRecord>> {
        let prefix = encode_source_prefix(namespace, name);
        let mut rows = Vec::new();
        for entry in self.providers.prefix(prefix) {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    /// Every platform row for one `(namespace, name, version)`.
    pub fn list_platform_rows(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<ProviderRecord>> {
        let prefix = encode_version_prefix(namespace, name, version);
        let mut rows = Vec::new();
        for entry in self.providers.prefix(prefix) {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    /// Filtered, paginated provider listing. Returns `(page, total_matching)`.
    pub fn list_providers(&self, filter: &ProviderFilter) -> Result<(Vec<ProviderRecord>, usize)> {
        let mut matching = Vec::new();
        for entry in self.providers.iter() {
            let (_, value) = entry?;
            let row: ProviderRecord = serde_json::from_slice(&value)?;
            if let Some(ns) = &filter.namespace {
                if &row.identity.namespace != ns {
                    continue;
                }
            }
            if let Some(name) = &filter.name {
                if &row.identity.name != name {
                    continue;
                }
            }
            matching.push(row);
        }
        let total = matching.len();
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect();
        Ok((page, total))
    }

    /// Insert a provider row, idempotent on identity.
    ///
    /// Returns the stored row and whether this call created it. A concurrent
    /// insert race resolves to the first writer's row.
    pub async fn create_provider(&self, record: ProviderRecord) -> Result<(ProviderRecord, bool)> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.lookup_provider(&record.identity)? {
            debug!(identity = %record.identity, "Provider already catalogued");
            return Ok((existing, false));
        }
        let key = encode_provider_key(&record.identity);
        self.providers
            .insert(&key, serde_json::to_vec(&record)?)?;
        self.provider_ids
            .insert(encode_provider_id_key(&record.id), &key)?;
        debug!(identity = %record.identity, id = %record.id, "Provider catalogued");
        Ok((record, true))
    }

    /// Remove a provider row. The blob is the caller's to delete afterwards;
    /// the row goes first so a crash cannot leave an uncatalogued orphan key.
    pub async fn delete_provider(&self, id: &str) -> Result<Option<ProviderRecord>> {
        let _guard = self.write_lock.lock().await;
        let Some(record) = self.get_provider_by_id(id)? else {
            return Ok(None);
        };
        self.providers.remove(encode_provider_key(&record.identity))?;
        self.provider_ids.remove(encode_provider_id_key(id))?;
        info!(identity = %record.identity, id, "Provider deleted from catalog");
        Ok(Some(record))
    }

    pub async fn set_provider_flags(
        &self,
        id: &str,
        deprecated: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<ProviderRecord> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .get_provider_by_id(id)?
            .ok_or_else(|| CatalogError::ProviderNotFound(id.to_string()))?;
        if let Some(flag) = deprecated {
            record.deprecated = flag;
        }
        if let Some(flag) = blocked {
            record.blocked = flag;
        }
        record.updated_at = Utc::now();
        self.providers.insert(
            encode_provider_key(&record.identity),
            serde_json::to_vec(&record)?,
        )?;
        Ok(record)
    }

    // ---- jobs ----

    /// Create a job with one pending item per identity, in input order.
    pub async fn create_job(&self, job_type: &str, items: &[ProviderIdentity]) -> Result<Job> {
        let _guard = self.write_lock.lock().await;

        let id = self.job_seq.fetch_add(1, Ordering::SeqCst);
        self.meta.insert(
            encode_meta_key(META_NEXT_JOB_SEQ),
            (id + 1).to_be_bytes(),
        )?;

        let now = Utc::now();
        let job = Job {
            id,
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            total: items.len(),
            completed: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        self.jobs
            .insert(encode_job_key(id), serde_json::to_vec(&job)?)?;

        for (seq, identity) in items.iter().enumerate() {
            let item = JobItem {
                job_id: id,
                seq: seq as u32,
                identity: identity.clone(),
                status: ItemStatus::Pending,
                retries: 0,
                error: None,
                updated_at: now,
            };
            self.items
                .insert(encode_item_key(id, seq as u32), serde_json::to_vec(&item)?)?;
        }

        info!(job_id = id, total = items.len(), job_type, "Job created");
        Ok(job)
    }

    pub fn get_job(&self, id: u64) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Jobs newest-first, optionally filtered by status.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let limit = if limit == 0 { 50 } else { limit };
        let mut jobs = Vec::new();
        let mut skipped = 0;
        for entry in self.jobs.iter().rev() {
            let (_, value) = entry?;
            let job: Job = serde_json::from_slice(&value)?;
            if let Some(wanted) = status {
                if job.status != wanted {
                    continue;
                }
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            jobs.push(job);
            if jobs.len() >= limit {
                break;
            }
        }
        Ok(jobs)
    }

    /// Atomically claim the oldest pending job, transitioning it to running.
    /// Returns at most one job per call.
    pub async fn claim_next_pending_job(&self) -> Result<Option<Job>> {
        let _guard = self.write_lock.lock().await;
        for entry in self.jobs.iter() {
            let (key, value) = entry?;
            let mut job: Job = serde_json::from_slice(&value)?;
            if job.status != JobStatus::Pending {
                continue;
            }
            let now = Utc::now();
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.updated_at = now;
            self.jobs.insert(key.as_ref(), serde_json::to_vec(&job)?)?;
            debug!(job_id = job.id, "Job claimed");
            return Ok(Some(job));
        }
        Ok(None)
    }

    pub async fn update_job_status(&self, id: u64, status: JobStatus) -> Result<Job> {
        let _guard = self.write_lock.lock().await;
        self.update_job_status_locked(id, status)
    }

    fn update_job_status_locked(&self, id: u64, status: JobStatus) -> Result<Job> {
        let mut job = self.get_job(id)?.ok_or(CatalogError::JobNotFound(id))?;
        let now = Utc::now();
        job.status = status;
        job.updated_at = now;
        if status.is_terminal() {
            job.finished_at = Some(now);
        } else {
            job.finished_at = None;
        }
        self.jobs
            .insert(encode_job_key(id), serde_json::to_vec(&job)?)?;
        Ok(job)
    }

    /// Recompute a job's counters from its items and persist them.
    /// Skipped items count as completed (done without failure).
    pub async fn refresh_job_counters(&self, id: u64) -> Result<Job> {
        let _guard = self.write_lock.lock().await;
        let items = self.list_items(id)?;
        let completed = items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Completed | ItemStatus::Skipped))
            .count();
        let failed = items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .count();

        let mut job = self.get_job(id)?.ok_or(CatalogError::JobNotFound(id))?;
        job.completed = completed;
        job.failed = failed;
        job.updated_at = Utc::now();
        self.jobs
            .insert(encode_job_key(id), serde_json::to_vec(&job)?)?;
        Ok(job)
    }

    pub fn list_items(&self, job_id: u64) -> Result<Vec<JobItem>> {
        let mut items = Vec::new();
        for entry in self.items.prefix(encode_item_prefix(job_id)) {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    pub async fn set_item_status(
        &self,
        job_id: u64,
        seq: u32,
        status: ItemStatus,
        error: Option<String>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = encode_item_key(job_id, seq);
        let Some(value) = self.items.get(key)? else {
            return Err(CatalogError::JobNotFound(job_id));
        };
        let mut item: JobItem = serde_json::from_slice(&value)?;
        item.status = status;
        item.error = error;
        item.updated_at = Utc::now();
        self.items.insert(key, serde_json::to_vec(&item)?)?;
        Ok(())
    }

    /// Reset failed items of a terminal job back to pending and re-open the
    /// job. Completed and skipped items keep their state. Returns the number
    /// of items reset.
    pub async fn reset_failed_items(&self, job_id: u64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut job = self
            .get_job(job_id)?
            .ok_or(CatalogError::JobNotFound(job_id))?;

        let mut reset = 0;
        for mut item in self.list_items(job_id)? {
            if item.status != ItemStatus::Failed {
                continue;
            }
            item.status = ItemStatus::Pending;
            item.error = None;
            item.retries += 1;
            item.updated_at = Utc::now();
            self.items
                .insert(encode_item_key(job_id, item.seq), serde_json::to_vec(&item)?)?;
            reset += 1;
        }

        job.status = JobStatus::Pending;
        job.failed = 0;
        job.updated_at = Utc::now();
        job.finished_at = None;
        self.jobs
            .insert(encode_job_key(job_id), serde_json::to_vec(&job)?)?;

        info!(job_id, reset, "Job re-opened for retry");
        Ok(reset)
    }

    /// Startup reconciliation: jobs left running by a previous process go
    /// back to pending, and their in-flight items are reset so the next
    /// claim re-processes them. Returns the number of jobs reconciled.
    pub async fn reconcile_stale(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut reconciled = 0;
        let mut stale_jobs = Vec::new();
        for entry in self.jobs.iter() {
            let (_, value) = entry?;
            let job: Job = serde_json::from_slice(&value)?;
            if job.status == JobStatus::Running {
                stale_jobs.push(job.id);
            }
        }
        for job_id in stale_jobs {
            for mut item in self.list_items(job_id)? {
                if item.status == ItemStatus::Downloading {
                    item.status = ItemStatus::Pending;
                    item.error = None;
                    item.updated_at = Utc::now();
                    self.items
                        .insert(encode_item_key(job_id, item.seq), serde_json::to_vec(&item)?)?;
                }
            }
            self.update_job_status_locked(job_id, JobStatus::Pending)?;
            reconciled += 1;
        }
        if reconciled > 0 {
            info!(reconciled, "Reconciled stale running jobs");
        }
        Ok(reconciled)
    }

    // ---- maintenance ----

    pub fn stats(&self) -> Result<CatalogStats> {
        let mut providers = 0;
        for entry in self.providers.iter() {
            entry?;
            providers += 1;
        }
        let mut jobs = 0;
        for entry in self.jobs.iter() {
            entry?;
            jobs += 1;
        }
        let mut job_items = 0;
        for entry in self.items.iter() {
            entry?;
            job_items += 1;
        }
        Ok(CatalogStats {
            providers,
            jobs,
            job_items,
        })
    }

    /// Flush pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

/// Sort version strings newest-first, semver-aware. Unparseable versions
/// sort last, lexicographically.
fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        match (semver::Version::parse(a), semver::Version::parse(b)) {
            (Ok(va), Ok(vb)) => vb.cmp(&va),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    });
}
