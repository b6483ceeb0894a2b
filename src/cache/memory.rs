//! In-memory LRU tier.
//!
//! A hash map holds the entries; a `BTreeMap` keyed by a monotonic access
//! sequence holds the recency order, so the least-recently-used entry is
//! always the map's first key. Operations never suspend; a single mutex
//! guards both structures.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use super::{CacheEntry, CacheError, Result, TierStats};

struct Slot {
    entry: CacheEntry,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    total_bytes: u64,
    next_seq: u64,
}

pub struct MemoryCache {
    max_bytes: u64,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(Inner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch an entry, refreshing its recency. An expired entry is evicted
    /// inline and reported as a miss.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let now = Utc::now();

        let expired = match inner.map.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            Self::remove_locked(&mut inner, key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let (entry, old_seq) = {
            let slot = inner.map.get_mut(key)?;
            let old_seq = slot.seq;
            slot.seq = seq;
            slot.entry.last_accessed = now;
            slot.entry.access_count += 1;
            (slot.entry.clone(), old_seq)
        };
        inner.order.remove(&old_seq);
        inner.order.insert(seq, key.to_string());

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Insert an entry, evicting least-recently-used entries until it fits.
    /// An entry larger than the whole tier is rejected with `TooLarge`.
    pub fn put_entry(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let size = entry.size();
        if size > self.max_bytes {
            return Err(CacheError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let mut inner = self.lock();
        Self::remove_locked(&mut inner, key);

        while inner.total_bytes + size > self.max_bytes {
            let Some((_, victim)) = inner.order.pop_first() else {
                break;
            };
            if let Some(slot) = inner.map.remove(&victim) {
                inner.total_bytes -= slot.entry.size();
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.total_bytes += size;
        inner.order.insert(seq, key.to_string());
        inner.map.insert(key.to_string(), Slot { entry, seq });
        Ok(())
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        Self::remove_locked(&mut inner, key)
    }

    fn remove_locked(inner: &mut Inner, key: &str) -> bool {
        match inner.map.remove(key) {
            Some(slot) => {
                inner.order.remove(&slot.seq);
                inner.total_bytes -= slot.entry.size();
                true
            }
            None => false,
        }
    }

    /// Non-mutating presence check; expired entries report absent.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.lock();
        match inner.map.get(key) {
            Some(slot) => !slot.entry.is_expired_at(Utc::now()),
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = Utc::now();
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            Self::remove_locked(&mut inner, key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn tier_stats(&self) -> TierStats {
        let inner = self.lock();
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            items: inner.map.len(),
            size_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
        }
    }
}
