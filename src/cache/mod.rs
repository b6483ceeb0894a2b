//! Two-tier response cache: an in-memory LRU (L1) over a disk tier (L2).
//!
//! The serving layer stores small JSON documents here keyed by canonical
//! request path. Both tiers enforce byte-size caps and TTLs; the tiered
//! composition adds promote-on-hit and write-through policies. A noop
//! implementation lets callers run cacheless without conditional logic.

pub mod disk;
pub mod memory;
pub mod noop;
pub mod tiered;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use disk::DiskCache;
pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use tiered::TieredCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("entry of {size} bytes exceeds tier capacity of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// What a cache hit hands back to the serving layer.
#[derive(Debug, Clone)]
pub struct CachedValue {
    pub data: Bytes,
    pub content_type: String,
}

/// A cached entry with its bookkeeping. Promotion between tiers copies the
/// entry as-is, so the original expiry carries over.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Bytes,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(data: Bytes, content_type: &str, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| now + t);
        Self {
            data,
            content_type: content_type.to_string(),
            created_at: now,
            expires_at,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    pub fn value(&self) -> CachedValue {
        CachedValue {
            data: self.data.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

/// Counters for a single tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub items: usize,
    pub size_bytes: u64,
    pub max_bytes: u64,
}

/// Combined view across tiers, plus per-tier detail when a tier exists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub items: usize,
    pub size_bytes: u64,
    pub max_bytes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub memory: Option<TierStats>,
    pub disk: Option<TierStats>,
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Fetch a live entry. Expired entries count as misses.
    async fn get(&self, key: &str) -> Option<CachedValue>;

    /// Store an entry. `None` TTL means the implementation's default policy
    /// (which may be "never expires").
    async fn set(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Remove an entry. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> bool;

    async fn clear(&self) -> Result<()>;

    async fn stats(&self) -> CacheStats;
}
