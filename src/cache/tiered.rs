//! Tiered composition of the memory and disk caches.
//!
//! Policy knobs:
//! - `promote_on_hit`: an L2 hit is copied into L1 with its original expiry.
//! - `write_through`: writes that land in L1 are mirrored to L2, so later L1
//!   evictions still hit on disk.
//!
//! Either tier may be absent; with both absent the cache degenerates to a
//! functioning no-op (callers wanting that should prefer [`super::NoopCache`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CacheConfig;

use super::{
    CacheEntry, CacheError, CacheStats, CachedValue, DiskCache, MemoryCache, ResponseCache, Result,
};

pub struct TieredCache {
    l1: Option<Arc<MemoryCache>>,
    l2: Option<Arc<DiskCache>>,
    promote_on_hit: bool,
    write_through: bool,
    default_ttl: Option<Duration>,
    promotions: AtomicU64,
}

impl TieredCache {
    /// Build tiers from configuration. A zero-size tier is disabled.
    pub fn from_config(cfg: &CacheConfig) -> Result<Self> {
        let l1 = match cfg.memory_size_mb {
            0 => None,
            mb => Some(Arc::new(MemoryCache::new(mb * 1024 * 1024))),
        };
        let l2 = match cfg.disk_size_gb {
            0 => None,
            gb => Some(Arc::new(DiskCache::open(
                &cfg.disk_path,
                gb * 1024 * 1024 * 1024,
            )?)),
        };
        Ok(Self {
            l1,
            l2,
            promote_on_hit: cfg.promote_on_hit,
            write_through: cfg.write_through,
            default_ttl: cfg.default_ttl(),
            promotions: AtomicU64::new(0),
        })
    }

    pub fn with_tiers(
        l1: Option<MemoryCache>,
        l2: Option<DiskCache>,
        promote_on_hit: bool,
        write_through: bool,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            l1: l1.map(Arc::new),
            l2: l2.map(Arc::new),
            promote_on_hit,
            write_through,
            default_ttl,
            promotions: AtomicU64::new(0),
        }
    }

    pub fn has_tiers(&self) -> bool {
        self.l1.is_some() || self.l2.is_some()
    }

    /// Populate L1 from the most recently used non-expired L2 entries, up to
    /// `max` items or until L1 stops accepting. Returns how many were loaded.
    pub async fn warmup(&self, max: usize) -> usize {
        let (Some(l1), Some(l2)) = (&self.l1, &self.l2) else {
            return 0;
        };
        let mut loaded = 0;
        for (key, entry) in l2.warmup_entries(max).await {
            match l1.put_entry(&key, entry) {
                Ok(()) => loaded += 1,
                Err(CacheError::TooLarge { .. }) => continue,
                Err(err) => {
                    warn!(error = %err, "Warmup aborted");
                    break;
                }
            }
        }
        debug!(loaded, "Cache warmup finished");
        loaded
    }

    /// Spawn the periodic TTL sweeps for both tiers. The tasks exit when the
    /// token is cancelled.
    pub fn spawn_sweepers(
        &self,
        cancel: CancellationToken,
        l1_interval: Duration,
        l2_interval: Duration,
    ) {
        if let Some(l1) = self.l1.clone() {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(l1_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let swept = l1.sweep_expired();
                            if swept > 0 {
                                debug!(swept, "Memory cache sweep");
                            }
                        }
                    }
                }
            });
        }
        if let Some(l2) = self.l2.clone() {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(l2_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            match l2.sweep_expired().await {
                                Ok(swept) if swept > 0 => debug!(swept, "Disk cache sweep"),
                                Ok(_) => {}
                                Err(err) => warn!(error = %err, "Disk cache sweep failed"),
                            }
                        }
                    }
                }
            });
        }
    }

    fn promote(&self, key: &str, entry: &CacheEntry) {
        let Some(l1) = &self.l1 else {
            return;
        };
        // Promotion keeps the entry's expiry; an oversize entry just stays
        // disk-only.
        match l1.put_entry(key, entry.clone()) {
            Ok(()) => {
                self.promotions.fetch_add(1, Ordering::Relaxed);
            }
            Err(CacheError::TooLarge { .. }) => {}
            Err(err) => warn!(key, error = %err, "Promotion failed"),
        }
    }
}

#[async_trait]
impl ResponseCache for TieredCache {
    async fn get(&self, key: &str) -> Option<CachedValue> {
        if let Some(l1) = &self.l1 {
            if let Some(entry) = l1.get_entry(key) {
                return Some(entry.value());
            }
        }
        if let Some(l2) = &self.l2 {
            if let Some(entry) = l2.get_entry(key).await {
                if self.promote_on_hit {
                    self.promote(key, &entry);
                }
                return Some(entry.value());
            }
        }
        None
    }

    async fn set(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entry = CacheEntry::new(data, content_type, ttl.or(self.default_ttl));

        match (&self.l1, &self.l2) {
            (Some(l1), l2) => match l1.put_entry(key, entry.clone()) {
                Ok(()) => {
                    if self.write_through {
                        if let Some(l2) = l2 {
                            l2.put_entry(key, entry).await?;
                        }
                    }
                    Ok(())
                }
                // Too big for memory: fall through to disk when available.
                Err(CacheError::TooLarge { .. }) if l2.is_some() => {
                    if let Some(l2) = l2 {
                        l2.put_entry(key, entry).await?;
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            },
            (None, Some(l2)) => l2.put_entry(key, entry).await,
            (None, None) => Ok(()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut removed = false;
        if let Some(l1) = &self.l1 {
            removed |= l1.remove(key);
        }
        if let Some(l2) = &self.l2 {
            removed |= l2.remove(key).await?;
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> bool {
        if let Some(l1) = &self.l1 {
            if l1.contains(key) {
                return true;
            }
        }
        if let Some(l2) = &self.l2 {
            if l2.contains(key).await {
                return true;
            }
        }
        false
    }

    async fn clear(&self) -> Result<()> {
        if let Some(l1) = &self.l1 {
            l1.clear();
        }
        if let Some(l2) = &self.l2 {
            l2.clear().await?;
        }
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let memory = self.l1.as_ref().map(|l1| l1.tier_stats());
        let disk = match &self.l2 {
            Some(l2) => Some(l2.tier_stats().await),
            None => None,
        };

        let hits = memory.as_ref().map_or(0, |t| t.hits) + disk.as_ref().map_or(0, |t| t.hits);
        // A request-level miss is a miss in the last tier consulted.
        let misses = disk
            .as_ref()
            .or(memory.as_ref())
            .map_or(0, |t| t.misses);
        let items =
            memory.as_ref().map_or(0, |t| t.items) + disk.as_ref().map_or(0, |t| t.items);
        let size_bytes = memory.as_ref().map_or(0, |t| t.size_bytes)
            + disk.as_ref().map_or(0, |t| t.size_bytes);
        let max_bytes = memory.as_ref().map_or(0, |t| t.max_bytes)
            + disk.as_ref().map_or(0, |t| t.max_bytes);
        let evictions = memory.as_ref().map_or(0, |t| t.evictions)
            + disk.as_ref().map_or(0, |t| t.evictions);
        let expirations = memory.as_ref().map_or(0, |t| t.expirations)
            + disk.as_ref().map_or(0, |t| t.expirations);

        CacheStats {
            hits,
            misses,
            items,
            size_bytes,
            max_bytes,
            evictions,
            expirations,
            promotions: self.promotions.load(Ordering::Relaxed),
            memory,
            disk,
        }
    }
}
