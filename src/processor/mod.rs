//! Pre-load job processor: a polling worker pool over the catalog.
//!
//! One poll loop claims at most one pending job per tick and hands it to a
//! worker task; items within a job run sequentially in insertion order, so
//! per-job concurrency stays bounded while up to `max_concurrent_jobs` jobs
//! run side by side. Cancellation flows from a root token through per-job
//! child tokens; shutdown drains workers for a bounded interval and aborts
//! whatever remains. Orphaned `downloading` items from a previous process are
//! reconciled back to `pending` on startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{
    CatalogError, CatalogStore, ItemStatus, Job, JobItem, JobStatus, ProviderRecord,
};
use crate::config::ProcessorConfig;
use crate::registry::RegistryClient;
use crate::storage::{ObjectStorage, keys};

pub const JOB_TYPE_PRELOAD: &str = "preload";

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("job {id} not found")]
    JobNotFound { id: u64 },

    #[error("job {id} is {status}, which does not allow this operation")]
    InvalidState { id: u64, status: JobStatus },
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    jobs_claimed: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    items_completed: AtomicU64,
    items_failed: AtomicU64,
    items_skipped: AtomicU64,
    bytes_downloaded: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessorSnapshot {
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_skipped: u64,
    pub bytes_downloaded: u64,
}

impl ProcessorMetrics {
    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            jobs_claimed: self.jobs_claimed.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_skipped: self.items_skipped.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

enum ItemOutcome {
    Completed { bytes: u64 },
    Skipped(&'static str),
    Failed(String),
    Cancelled,
}

pub struct JobProcessor {
    catalog: Arc<CatalogStore>,
    storage: Arc<ObjectStorage>,
    registry: Arc<RegistryClient>,
    hostname: String,
    cfg: ProcessorConfig,
    root: CancellationToken,
    active: Mutex<HashMap<u64, CancellationToken>>,
    metrics: ProcessorMetrics,
}

impl JobProcessor {
    pub fn new(
        catalog: Arc<CatalogStore>,
        storage: Arc<ObjectStorage>,
        registry: Arc<RegistryClient>,
        hostname: String,
        cfg: ProcessorConfig,
        root: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            storage,
            registry,
            hostname,
            cfg,
            root,
            active: Mutex::new(HashMap::new()),
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn metrics(&self) -> ProcessorSnapshot {
        self.metrics.snapshot()
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// The poll loop. Runs until the root token is cancelled, then drains
    /// in-flight workers within the configured shutdown window.
    pub async fn run(self: Arc<Self>) {
        match self.catalog.reconcile_stale().await {
            Ok(0) => {}
            Ok(reconciled) => info!(reconciled, "Requeued jobs left running by previous process"),
            Err(err) => error!(error = %err, "Startup reconciliation failed"),
        }

        let mut workers: JoinSet<()> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.cfg.polling_interval());

        info!(
            interval_secs = self.cfg.polling_interval,
            pool = self.cfg.max_concurrent_jobs,
            "Job processor started"
        );

        loop {
            tokio::select! {
                _ = self.root.cancelled() => break,
                _ = ticker.tick() => {
                    while workers.try_join_next().is_some() {}
                    if workers.len() >= self.cfg.max_concurrent_jobs {
                        continue;
                    }
                    match self.catalog.claim_next_pending_job().await {
                        Ok(Some(job)) => {
                            let token = self.root.child_token();
                            self.active.lock().await.insert(job.id, token.clone());
                            self.metrics.jobs_claimed.fetch_add(1, Ordering::Relaxed);
                            let this = Arc::clone(&self);
                            workers.spawn(async move {
                                this.process_job(job, token).await;
                            });
                        }
                        Ok(None) => {}
                        Err(err) => error!(error = %err, "Failed to claim job"),
                    }
                }
            }
        }

        info!(in_flight = workers.len(), "Processor draining");
        let drained = tokio::time::timeout(self.cfg.worker_shutdown(), async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            let aborted = workers.len();
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            warn!(aborted, "Drain timeout elapsed, aborted in-flight workers");
        }
        info!("Processor stopped");
    }

    /// Re-open a terminal job, resetting only its failed items.
    pub async fn retry_job(&self, id: u64) -> Result<usize> {
        let job = self
            .catalog
            .get_job(id)?
            .ok_or(ProcessorError::JobNotFound { id })?;
        if !job.status.is_terminal() {
            return Err(ProcessorError::InvalidState {
                id,
                status: job.status,
            });
        }
        Ok(self.catalog.reset_failed_items(id).await?)
    }

    /// Cancel a job. A running job is signalled through its token and winds
    /// down at the next item boundary; a pending job is cancelled in place.
    pub async fn cancel_job(&self, id: u64) -> Result<()> {
        if let Some(token) = self.active.lock().await.get(&id) {
            token.cancel();
            info!(job_id = id, "Cancellation signalled to running job");
            return Ok(());
        }

        let job = self
            .catalog
            .get_job(id)?
            .ok_or(ProcessorError::JobNotFound { id })?;
        match job.status {
            JobStatus::Pending | JobStatus::Running => {
                for item in self.catalog.list_items(id)? {
                    if matches!(item.status, ItemStatus::Pending | ItemStatus::Downloading) {
                        self.catalog
                            .set_item_status(
                                id,
                                item.seq,
                                ItemStatus::Skipped,
                                Some("job cancelled".to_string()),
                            )
                            .await?;
                    }
                }
                self.catalog.refresh_job_counters(id).await?;
                self.catalog.update_job_status(id, JobStatus::Cancelled).await?;
                self.metrics.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
                info!(job_id = id, "Job cancelled");
                Ok(())
            }
            status => Err(ProcessorError::InvalidState { id, status }),
        }
    }

    async fn process_job(&self, job: Job, token: CancellationToken) {
        info!(job_id = job.id, total = job.total, "Job started");

        let items = match self.catalog.list_items(job.id) {
            Ok(items) => items,
            Err(err) => {
                error!(job_id = job.id, error = %err, "Failed to list job items");
                self.finish_job(job.id, JobStatus::Failed).await;
                return;
            }
        };

        let mut cancelled = false;
        for item in items {
            if item.status != ItemStatus::Pending {
                continue;
            }
            if token.is_cancelled() {
                cancelled = true;
            }
            if cancelled {
                let _ = self
                    .catalog
                    .set_item_status(
                        job.id,
                        item.seq,
                        ItemStatus::Skipped,
                        Some("job cancelled".to_string()),
                    )
                    .await;
                self.metrics.items_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let outcome = self.process_item(&item, &token).await;
            let (status, error) = match outcome {
                ItemOutcome::Completed { bytes } => {
                    self.metrics.items_completed.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .bytes_downloaded
                        .fetch_add(bytes, Ordering::Relaxed);
                    (ItemStatus::Completed, None)
                }
                ItemOutcome::Skipped(reason) => {
                    self.metrics.items_skipped.fetch_add(1, Ordering::Relaxed);
                    (ItemStatus::Skipped, Some(reason.to_string()))
                }
                ItemOutcome::Failed(message) => {
                    warn!(job_id = job.id, item = %item.identity, error = %message, "Item failed");
                    self.metrics.items_failed.fetch_add(1, Ordering::Relaxed);
                    (ItemStatus::Failed, Some(message))
                }
                ItemOutcome::Cancelled => {
                    cancelled = true;
                    self.metrics.items_skipped.fetch_add(1, Ordering::Relaxed);
                    (ItemStatus::Skipped, Some("job cancelled".to_string()))
                }
            };

            if let Err(err) = self
                .catalog
                .set_item_status(job.id, item.seq, status, error)
                .await
            {
                error!(job_id = job.id, error = %err, "Failed to record item status");
            }
            if let Err(err) = self.catalog.refresh_job_counters(job.id).await {
                error!(job_id = job.id, error = %err, "Failed to update job counters");
            }
        }

        let final_status = match self.catalog.get_job(job.id) {
            Ok(Some(done)) => job_final_status(cancelled, done.completed, done.failed),
            _ => JobStatus::Completed,
        };
        self.finish_job(job.id, final_status).await;
    }

    async fn finish_job(&self, job_id: u64, status: JobStatus) {
        if let Err(err) = self.catalog.update_job_status(job_id, status).await {
            error!(job_id, error = %err, "Failed to finalize job");
        }
        match status {
            JobStatus::Completed => {
                self.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Failed => {
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Cancelled => {
                self.metrics.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.active.lock().await.remove(&job_id);
        info!(job_id, status = %status, "Job finished");
    }

    async fn process_item(&self, item: &JobItem, token: &CancellationToken) -> ItemOutcome {
        let identity = &item.identity;

        match self.catalog.lookup_provider(identity) {
            Ok(Some(_)) => return ItemOutcome::Skipped("already present"),
            Ok(None) => {}
            Err(err) => return ItemOutcome::Failed(err.to_string()),
        }

        let Some((os, arch)) = identity.os_arch() else {
            return ItemOutcome::Failed(format!("malformed platform '{}'", identity.platform));
        };
        let (os, arch) = (os.to_string(), arch.to_string());

        if let Err(err) = self
            .catalog
            .set_item_status(item.job_id, item.seq, ItemStatus::Downloading, None)
            .await
        {
            return ItemOutcome::Failed(err.to_string());
        }

        debug!(item = %identity, "Downloading");
        let download = tokio::select! {
            _ = token.cancelled() => return ItemOutcome::Cancelled,
            result = self.registry.download(
                &identity.namespace,
                &identity.name,
                &identity.version,
                &os,
                &arch,
            ) => result,
        };
        let completed = match download {
            Ok(completed) => completed,
            Err(err) => return ItemOutcome::Failed(err.to_string()),
        };

        let key = match keys::provider_archive(
            &self.hostname,
            &identity.namespace,
            &identity.name,
            &identity.version,
            &identity.platform,
            &completed.info.filename,
        ) {
            Ok(key) => key,
            Err(err) => return ItemOutcome::Failed(err.to_string()),
        };

        let size = completed.data.len() as u64;
        let metadata = [
            ("namespace".to_string(), identity.namespace.clone()),
            ("name".to_string(), identity.name.clone()),
            ("version".to_string(), identity.version.clone()),
            ("platform".to_string(), identity.platform.clone()),
        ];
        if let Err(err) = self
            .storage
            .upload(&key, completed.data, "application/zip", &metadata)
            .await
        {
            self.rollback_item_objects(identity).await;
            return ItemOutcome::Failed(err.to_string());
        }

        let now = Utc::now();
        let record = ProviderRecord {
            id: Uuid::now_v7().to_string(),
            identity: identity.clone(),
            filename: completed.info.filename.clone(),
            shasum: completed.info.shasum.to_lowercase(),
            storage_key: key.clone(),
            size_bytes: size,
            protocols: completed.info.protocols.clone(),
            created_at: now,
            updated_at: now,
            deprecated: false,
            blocked: false,
        };
        if let Err(err) = self.catalog.create_provider(record).await {
            self.rollback_item_objects(identity).await;
            return ItemOutcome::Failed(err.to_string());
        }

        info!(
            item = %identity,
            size,
            duration_ms = completed.duration.as_millis() as u64,
            "Item downloaded and catalogued"
        );
        ItemOutcome::Completed { bytes: size }
    }

    /// Best-effort removal of partially written objects for one item.
    async fn rollback_item_objects(&self, identity: &crate::catalog::ProviderIdentity) {
        let Ok(prefix) = keys::provider_archive_prefix(
            &self.hostname,
            &identity.namespace,
            &identity.name,
            &identity.version,
            &identity.platform,
        ) else {
            return;
        };
        match self.storage.list_prefix(&prefix).await {
            Ok(orphans) => {
                for key in orphans {
                    if let Err(err) = self.storage.delete(&key).await {
                        warn!(key, error = %err, "Rollback delete failed");
                    }
                }
            }
            Err(err) => warn!(prefix, error = %err, "Rollback listing failed"),
        }
    }
}

/// Jobs complete even with failures; `failed` is reserved for jobs where
/// nothing succeeded at all.
fn job_final_status(cancelled: bool, completed: usize, failed: usize) -> JobStatus {
    if cancelled {
        JobStatus::Cancelled
    } else if failed > 0 && completed == 0 {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}
