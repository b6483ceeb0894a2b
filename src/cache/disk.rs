//! Disk tier: content-addressed files plus a JSON index.
//!
//! Entries live under `{root}/{aa}/{sha256(key)}.bin`, sharded by the first
//! two hex characters of the key hash. The index file records bookkeeping for
//! every entry and is rewritten (tmp file + rename) on every mutation, then
//! reloaded on open; entries whose data file has vanished are dropped. One
//! async mutex guards the index and the filesystem together.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheEntry, CacheError, Result, TierStats};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    file: String,
    content_type: String,
    size: u64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_accessed: DateTime<Utc>,
    access_count: u64,
}

impl DiskEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DiskIndex {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: HashMap<String, DiskEntry>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, DiskEntry>,
    total_bytes: u64,
}

pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
    state: Mutex<State>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl DiskCache {
    /// Open the tier at `root`, reloading the persisted index.
    pub fn open(root: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut entries = HashMap::new();
        let mut total_bytes = 0;
        let index_path = root.join(INDEX_FILE);
        if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            let index: DiskIndex = serde_json::from_str(&raw)?;
            for (key, entry) in index.entries {
                if root.join(&entry.file).exists() {
                    total_bytes += entry.size;
                    entries.insert(key, entry);
                } else {
                    warn!(key, file = %entry.file, "Dropping index entry with missing data file");
                }
            }
        }

        debug!(root = %root.display(), entries = entries.len(), total_bytes, "Disk cache opened");

        Ok(Self {
            root,
            max_bytes,
            state: Mutex::new(State {
                entries,
                total_bytes,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn shard_rel(key: &str) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}/{}.bin", &digest[..2], digest)
    }

    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let expired = match state.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            self.remove_locked(&mut state, key);
            let _ = self.persist_index(&state);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let (file, meta) = {
            let entry = state.entries.get_mut(key)?;
            entry.last_accessed = now;
            entry.access_count += 1;
            (self.root.join(&entry.file), entry.clone())
        };

        let data = match std::fs::read(&file) {
            Ok(data) => Bytes::from(data),
            Err(err) => {
                warn!(key, error = %err, "Cache data file unreadable, dropping entry");
                self.remove_locked(&mut state, key);
                let _ = self.persist_index(&state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let _ = self.persist_index(&state);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheEntry {
            data,
            content_type: meta.content_type,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            last_accessed: meta.last_accessed,
            access_count: meta.access_count,
        })
    }

    pub async fn put_entry(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let size = entry.size();
        if size > self.max_bytes {
            return Err(CacheError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let mut state = self.state.lock().await;
        self.remove_locked(&mut state, key);

        // Evict by last access until the new entry fits.
        while state.total_bytes + size > self.max_bytes {
            let Some(victim) = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.remove_locked(&mut state, &victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        let rel = Self::shard_rel(key);
        let path = self.root.join(&rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &entry.data)?;

        state.entries.insert(
            key.to_string(),
            DiskEntry {
                file: rel,
                content_type: entry.content_type,
                size,
                created_at: entry.created_at,
                expires_at: entry.expires_at,
                last_accessed: entry.last_accessed,
                access_count: entry.access_count,
            },
        );
        state.total_bytes += size;
        self.persist_index(&state)?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = self.remove_locked(&mut state, key);
        if removed {
            self.persist_index(&state)?;
        }
        Ok(removed)
    }

    fn remove_locked(&self, state: &mut State, key: &str) -> bool {
        match state.entries.remove(key) {
            Some(entry) => {
                state.total_bytes -= entry.size;
                if let Err(err) = std::fs::remove_file(self.root.join(&entry.file)) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(key, error = %err, "Failed to remove cache data file");
                    }
                }
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        match state.entries.get(key) {
            Some(entry) => !entry.is_expired_at(Utc::now()),
            None => false,
        }
    }

    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in keys {
            self.remove_locked(&mut state, &key);
        }
        self.persist_index(&state)?;
        Ok(())
    }

    pub async fn sweep_expired(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_locked(&mut state, key);
        }
        if !expired.is_empty() {
            self.persist_index(&state)?;
            self.expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        Ok(expired.len())
    }

    /// Non-expired entries for warming the memory tier, most recently
    /// accessed first, capped at `limit`. Reads the data files.
    pub async fn warmup_entries(&self, limit: usize) -> Vec<(String, CacheEntry)> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut live: Vec<(&String, &DiskEntry)> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .collect();
        live.sort_by(|a, b| b.1.last_accessed.cmp(&a.1.last_accessed));

        let mut out = Vec::new();
        for (key, meta) in live.into_iter().take(limit) {
            let Ok(data) = std::fs::read(self.root.join(&meta.file)) else {
                continue;
            };
            out.push((
                key.clone(),
                CacheEntry {
                    data: Bytes::from(data),
                    content_type: meta.content_type.clone(),
                    created_at: meta.created_at,
                    expires_at: meta.expires_at,
                    last_accessed: meta.last_accessed,
                    access_count: meta.access_count,
                },
            ));
        }
        out
    }

    pub async fn tier_stats(&self) -> TierStats {
        let state = self.state.lock().await;
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            items: state.entries.len(),
            size_bytes: state.total_bytes,
            max_bytes: self.max_bytes,
        }
    }

    fn persist_index(&self, state: &State) -> Result<()> {
        let index = DiskIndex {
            version: 1,
            entries: state.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&index)?;
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
