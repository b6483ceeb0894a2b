//! Null cache: every read misses, every write is accepted and dropped.
//! Lets callers run without a cache and without conditional logic.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{CacheStats, CachedValue, ResponseCache, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<CachedValue> {
        None
    }

    async fn set(
        &self,
        _key: &str,
        _data: Bytes,
        _content_type: &str,
        _ttl: Option<Duration>,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> bool {
        false
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
