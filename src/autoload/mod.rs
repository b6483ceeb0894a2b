//! On-demand auto-download coordinator.
//!
//! A serving-layer miss lands here. Admission runs in stages: namespace
//! allow/block lists, the negative cache, single-flight registration, the
//! token-bucket rate gate, and a counting semaphore bounding concurrent
//! upstream fetches. Concurrent requests for the same identity attach to one
//! in-flight rendezvous and all receive the first arriver's outcome. Terminal
//! upstream failures are negative-cached so repeated misses don't hammer the
//! registry.

pub mod ratelimit;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogStore, ProviderIdentity, ProviderRecord};
use crate::config::AutoDownloadConfig;
use crate::registry::{RegistryClient, RegistryError, UpstreamVersion};
use crate::storage::{ObjectStorage, keys};

use ratelimit::TokenBucket;

/// Coordinator errors are cloneable so one flight's outcome can be handed to
/// every attached waiter.
#[derive(Debug, Clone, Error)]
pub enum AutoloadError {
    #[error("auto-download is disabled")]
    Disabled,

    #[error("namespace '{0}' is not permitted for auto-download")]
    NamespaceBlocked(String),

    #[error("'{identity}' is negative-cached until {until}")]
    NegativeCached {
        identity: String,
        until: DateTime<Utc>,
    },

    #[error("rate limit admission timed out")]
    RateLimited,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("checksum verification failed: {0}")]
    Checksum(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("catalog failure: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, AutoloadError>;

type FlightOutcome = std::result::Result<ProviderRecord, AutoloadError>;
type FlightReceiver = watch::Receiver<Option<FlightOutcome>>;

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
    negative_hits: AtomicU64,
    rate_limited: AtomicU64,
    namespace_blocked: AtomicU64,
    bytes_downloaded: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AutoloadSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub coalesced: u64,
    pub negative_hits: u64,
    pub rate_limited: u64,
    pub namespace_blocked: u64,
    pub bytes_downloaded: u64,
    pub in_flight: usize,
    pub negative_entries: usize,
}

pub struct Autoloader {
    cfg: AutoDownloadConfig,
    registry: Arc<RegistryClient>,
    storage: Arc<ObjectStorage>,
    catalog: Arc<CatalogStore>,
    hostname: String,
    in_flight: DashMap<String, FlightReceiver>,
    negative: DashMap<String, DateTime<Utc>>,
    bucket: TokenBucket,
    permits: Arc<Semaphore>,
    counters: Counters,
}

impl Autoloader {
    pub fn new(
        cfg: AutoDownloadConfig,
        registry: Arc<RegistryClient>,
        storage: Arc<ObjectStorage>,
        catalog: Arc<CatalogStore>,
        hostname: String,
    ) -> Self {
        let bucket = TokenBucket::new(cfg.rate_limit_per_minute, cfg.max_concurrent_downloads);
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_downloads.max(1)));
        Self {
            cfg,
            registry,
            storage,
            catalog,
            hostname,
            in_flight: DashMap::new(),
            negative: DashMap::new(),
            bucket,
            permits,
            counters: Counters::default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn stats(&self) -> AutoloadSnapshot {
        AutoloadSnapshot {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            negative_hits: self.counters.negative_hits.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            namespace_blocked: self.counters.namespace_blocked.load(Ordering::Relaxed),
            bytes_downloaded: self.counters.bytes_downloaded.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
            negative_entries: self.negative.len(),
        }
    }

    /// Download one archive on demand and catalogue it. Concurrent calls for
    /// the same identity coalesce into a single upstream fetch.
    pub async fn download(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<ProviderRecord> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if !self.cfg.enabled {
            return Err(AutoloadError::Disabled);
        }
        self.check_namespace(namespace)?;

        let identity = ProviderIdentity::for_platform(namespace, name, version, os, arch);
        let key = identity.key();

        // Already mirrored: nothing to coordinate.
        if let Ok(Some(record)) = self.catalog.lookup_provider(&identity) {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
            return Ok(record);
        }

        self.check_negative(&key)?;

        // Single flight: register, or attach to the existing rendezvous.
        let (tx, rx) = watch::channel(None);
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                let rx = existing.get().clone();
                drop(existing);
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(identity = %key, "Attached to in-flight download");
                return await_flight(rx).await;
            }
            Entry::Vacant(slot) => {
                slot.insert(rx);
            }
        }
        // If this future is dropped mid-flight, the guard unregisters the
        // rendezvous; dropping `tx` then wakes attached waiters with an error.
        let guard = FlightGuard {
            map: &self.in_flight,
            key: key.clone(),
        };

        let outcome = self.execute(&identity).await;

        match &outcome {
            Ok(record) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_downloaded
                    .fetch_add(record.size_bytes, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.record_negative(&key, err);
            }
        }

        // Publish, then unregister: anyone attached before removal (including
        // arrivals in between) reads this outcome from the rendezvous; only
        // callers arriving after removal start a fresh flight.
        let _ = tx.send(Some(outcome.clone()));
        drop(guard);
        outcome
    }

    /// Resolve the requested platform in the foreground, then kick off
    /// background downloads for every other configured platform of the same
    /// version. Background failures only get logged.
    pub async fn download_all_platforms(
        self: Arc<Self>,
        namespace: &str,
        name: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<ProviderRecord> {
        let record = self.download(namespace, name, version, os, arch).await?;

        let requested = format!("{}_{}", os, arch);
        for platform in &self.cfg.platforms {
            if platform == &requested {
                continue;
            }
            let Some((sib_os, sib_arch)) = platform.split_once('_') else {
                continue;
            };
            let this = Arc::clone(&self);
            let (namespace, name, version) = (
                namespace.to_string(),
                name.to_string(),
                version.to_string(),
            );
            let (sib_os, sib_arch) = (sib_os.to_string(), sib_arch.to_string());
            tokio::spawn(async move {
                match this
                    .download(&namespace, &name, &version, &sib_os, &sib_arch)
                    .await
                {
                    Ok(_) => {}
                    Err(AutoloadError::NegativeCached { .. }) => {}
                    Err(err) => {
                        debug!(
                            provider = format!("{}/{}", namespace, name),
                            version,
                            platform = format!("{}_{}", sib_os, sib_arch),
                            error = %err,
                            "Background platform download failed"
                        );
                    }
                }
            });
        }

        Ok(record)
    }

    /// Upstream version list, for serving an empty catalog.
    pub async fn available_versions(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<UpstreamVersion>> {
        if !self.cfg.enabled {
            return Err(AutoloadError::Disabled);
        }
        self.check_namespace(namespace)?;
        self.registry
            .list_versions(namespace, name)
            .await
            .map_err(|err| map_registry_error(err, &format!("{}/{}", namespace, name)))
    }

    fn check_namespace(&self, namespace: &str) -> Result<()> {
        let blocked = self
            .cfg
            .blocked_namespaces
            .iter()
            .any(|ns| ns == namespace)
            || (!self.cfg.allowed_namespaces.is_empty()
                && !self.cfg.allowed_namespaces.iter().any(|ns| ns == namespace));
        if blocked {
            self.counters
                .namespace_blocked
                .fetch_add(1, Ordering::Relaxed);
            return Err(AutoloadError::NamespaceBlocked(namespace.to_string()));
        }
        Ok(())
    }

    fn check_negative(&self, key: &str) -> Result<()> {
        if let Some(until) = self.negative.get(key).map(|e| *e.value()) {
            if Utc::now() < until {
                self.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
                return Err(AutoloadError::NegativeCached {
                    identity: key.to_string(),
                    until,
                });
            }
            self.negative.remove(key);
        }
        Ok(())
    }

    fn record_negative(&self, key: &str, err: &AutoloadError) {
        if !self.cfg.cache_negative_results {
            return;
        }
        if matches!(
            err,
            AutoloadError::NotFound(_) | AutoloadError::Upstream(_) | AutoloadError::Checksum(_)
        ) {
            let until = Utc::now() + self.cfg.negative_ttl();
            self.negative.insert(key.to_string(), until);
            debug!(identity = key, %until, "Negative-cached failed download");
        }
    }

    /// Admission (rate gate, then semaphore) and the actual work, all bounded
    /// by one deadline.
    async fn execute(&self, identity: &ProviderIdentity) -> FlightOutcome {
        let deadline = Instant::now() + self.cfg.timeout();

        if !self.bucket.acquire(deadline).await {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            return Err(AutoloadError::RateLimited);
        }

        let permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AutoloadError::Upstream("admission closed".to_string())),
            Err(_) => return Err(AutoloadError::DeadlineExceeded),
        };
        let _permit = permit;

        // Lost-race double check: a previous flight may have landed the row
        // between our miss and our admission.
        match self.catalog.lookup_provider(identity) {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(err) => return Err(AutoloadError::Catalog(err.to_string())),
        }

        let Some((os, arch)) = identity.os_arch() else {
            return Err(AutoloadError::NotFound(identity.key()));
        };

        let completed = match tokio::time::timeout_at(
            deadline,
            self.registry.download(
                &identity.namespace,
                &identity.name,
                &identity.version,
                os,
                arch,
            ),
        )
        .await
        {
            Ok(Ok(completed)) => completed,
            Ok(Err(err)) => return Err(map_registry_error(err, &identity.key())),
            Err(_) => return Err(AutoloadError::DeadlineExceeded),
        };

        let key = keys::provider_archive(
            &self.hostname,
            &identity.namespace,
            &identity.name,
            &identity.version,
            &identity.platform,
            &completed.info.filename,
        )
        .map_err(|err| AutoloadError::Storage(err.to_string()))?;

        let size = completed.data.len() as u64;
        let metadata = [
            ("namespace".to_string(), identity.namespace.clone()),
            ("name".to_string(), identity.name.clone()),
            ("version".to_string(), identity.version.clone()),
            ("platform".to_string(), identity.platform.clone()),
        ];
        self.storage
            .upload(&key, completed.data, "application/zip", &metadata)
            .await
            .map_err(|err| AutoloadError::Storage(err.to_string()))?;

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

        // create_provider is idempotent on identity: a lost insertion race
        // returns the winner's row, and our blob shares the same key.
        let (stored, created) = match self.catalog.create_provider(record).await {
            Ok(result) => result,
            Err(err) => {
                if let Err(cleanup) = self.storage.delete(&key).await {
                    warn!(key, error = %cleanup, "Cleanup after catalog failure failed");
                }
                return Err(AutoloadError::Catalog(err.to_string()));
            }
        };

        info!(
            identity = %identity,
            size,
            created,
            duration_ms = completed.duration.as_millis() as u64,
            "Auto-download complete"
        );
        Ok(stored)
    }
}

/// Removes the in-flight registration on drop, whether the flight finished
/// normally or its future was dropped partway.
struct FlightGuard<'a> {
    map: &'a DashMap<String, FlightReceiver>,
    key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

async fn await_flight(mut rx: FlightReceiver) -> FlightOutcome {
    if let Some(outcome) = rx.borrow_and_update().clone() {
        return outcome;
    }
    loop {
        if rx.changed().await.is_err() {
            return Err(AutoloadError::Upstream(
                "in-flight download abandoned".to_string(),
            ));
        }
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
    }
}

fn map_registry_error(err: RegistryError, what: &str) -> AutoloadError {
    match err {
        RegistryError::NotFound(_) => AutoloadError::NotFound(what.to_string()),
        RegistryError::ChecksumMismatch { expected, actual } => AutoloadError::Checksum(format!(
            "expected {}, got {}",
            expected, actual
        )),
        other => AutoloadError::Upstream(other.to_string()),
    }
}
