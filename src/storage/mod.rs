//! Object storage abstraction for provider archives and backups.
//! Wraps the Apache Arrow object_store crate with key validation and
//! presigned-URL support.

pub mod keys;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StoragePath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend misconfigured: {0}")]
    Config(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Metadata for a stored object.
#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

/// Storage client wrapping an object_store backend.
///
/// Presigning depends on the backend: S3 produces real signed URLs, while the
/// local and in-memory backends return a `/blobs/{key}` path that the serving
/// layer handles itself.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<AmazonS3>>,
    presign_ttl: Duration,
}

impl ObjectStorage {
    /// Build a storage client from configuration.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        let presign_ttl = Duration::from_secs(cfg.presign_ttl_hours * 3600);
        match cfg.provider {
            StorageProvider::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&cfg.bucket);
                if let Some(region) = &cfg.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &cfg.endpoint {
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let Some(access_key) = &cfg.access_key {
                    builder = builder.with_access_key_id(access_key);
                }
                if let Some(secret_key) = &cfg.secret_key {
                    builder = builder.with_secret_access_key(secret_key);
                }
                let s3 = Arc::new(
                    builder
                        .build()
                        .map_err(|e| StorageError::Config(e.to_string()))?,
                );
                Ok(Self {
                    store: s3.clone(),
                    signer: Some(s3),
                    presign_ttl,
                })
            }
            StorageProvider::Local => {
                std::fs::create_dir_all(&cfg.local_path)
                    .map_err(|e| StorageError::Config(e.to_string()))?;
                let fs = LocalFileSystem::new_with_prefix(&cfg.local_path)
                    .map_err(|e| StorageError::Config(e.to_string()))?;
                Ok(Self {
                    store: Arc::new(fs),
                    signer: None,
                    presign_ttl,
                })
            }
            StorageProvider::Memory => Ok(Self::in_memory()),
        }
    }

    /// In-memory storage for tests and development.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            signer: None,
            presign_ttl: Duration::from_secs(24 * 3600),
        }
    }

    /// Upload bytes under a key, recording content type and metadata pairs.
    pub async fn upload(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<UploadReceipt> {
        let path = self.path(key)?;
        let size = data.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        for (name, value) in metadata {
            attributes.insert(Attribute::Metadata(name.clone().into()), value.clone().into());
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        let put_result = self.store.put_opts(&path, data.into(), opts).await?;

        tracing::debug!(key, size, "Uploaded to storage");

        Ok(UploadReceipt {
            key: key.to_string(),
            etag: put_result.e_tag.clone(),
            size,
        })
    }

    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = self.path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| not_found_or(key, e))?;
        let bytes = result.bytes().await?;
        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");
        Ok(bytes)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| not_found_or(key, e))?;
        tracing::debug!(key, "Deleted from storage");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn metadata(&self, key: &str) -> Result<BlobMeta> {
        let path = self.path(key)?;
        let meta = self
            .store
            .head(&path)
            .await
            .map_err(|e| not_found_or(key, e))?;
        Ok(BlobMeta {
            key: key.to_string(),
            size: meta.size as u64,
            last_modified: meta.last_modified,
            etag: meta.e_tag,
        })
    }

    pub async fn size(&self, key: &str) -> Result<u64> {
        Ok(self.metadata(key).await?.size)
    }

    /// Keys directly under a prefix (non-recursive).
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let path = self.path(prefix)?;
        let listing = self.store.list_with_delimiter(Some(&path)).await?;
        Ok(listing
            .objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }

    /// A time-limited URL for fetching the object directly.
    ///
    /// S3 backends sign a real URL; other backends hand back the serving
    /// layer's `/blobs/` path, which is not time-limited.
    pub async fn presign(&self, key: &str, ttl: Option<Duration>) -> Result<String> {
        let path = self.path(key)?;
        match &self.signer {
            Some(s3) => {
                let url = s3
                    .signed_url(
                        reqwest::Method::GET,
                        &path,
                        ttl.unwrap_or(self.presign_ttl),
                    )
                    .await?;
                Ok(url.to_string())
            }
            None => Ok(format!("/blobs/{}", key)),
        }
    }

    fn path(&self, key: &str) -> Result<StoragePath> {
        validate_key(key)?;
        Ok(StoragePath::from(key))
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidKey(format!(
            "absolute key not allowed: {:?}",
            key
        )));
    }
    if key.split('/').any(|part| part == ".." || part == ".") {
        return Err(StorageError::InvalidKey(format!(
            "traversal component in key: {:?}",
            key
        )));
    }
    Ok(())
}

fn not_found_or(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        other => StorageError::ObjectStore(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_and_download_round_trip() {
        let storage = ObjectStorage::in_memory();
        let receipt = storage
            .upload(
                "providers/h/ns/n/1.0.0/linux_amd64/a.zip",
                Bytes::from_static(b"archive bytes"),
                "application/zip",
                &[("namespace".to_string(), "ns".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(receipt.size, 13);

        let bytes = storage
            .download("providers/h/ns/n/1.0.0/linux_amd64/a.zip")
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"archive bytes");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let storage = ObjectStorage::in_memory();
        let err = storage.download("providers/missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!storage.exists("providers/missing").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let storage = ObjectStorage::in_memory();
        storage
            .upload("k/v.zip", Bytes::from_static(b"x"), "application/zip", &[])
            .await
            .unwrap();
        assert!(storage.exists("k/v.zip").await.unwrap());
        storage.delete("k/v.zip").await.unwrap();
        assert!(!storage.exists("k/v.zip").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_bad_keys() {
        let storage = ObjectStorage::in_memory();
        for key in ["", "/abs", "a/../b", "./x"] {
            let err = storage.download(key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn list_prefix_is_scoped() {
        let storage = ObjectStorage::in_memory();
        for key in ["p/a/one.zip", "p/a/two.zip", "p/b/other.zip"] {
            storage
                .upload(key, Bytes::from_static(b"x"), "application/zip", &[])
                .await
                .unwrap();
        }
        let mut keys = storage.list_prefix("p/a").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p/a/one.zip", "p/a/two.zip"]);
    }

    #[tokio::test]
    async fn local_presign_is_blob_path() {
        let storage = ObjectStorage::in_memory();
        let url = storage.presign("p/a/one.zip", None).await.unwrap();
        assert_eq!(url, "/blobs/p/a/one.zip");
    }

    #[tokio::test]
    async fn size_reports_bytes() {
        let storage = ObjectStorage::in_memory();
        storage
            .upload("k", Bytes::from_static(b"12345"), "application/zip", &[])
            .await
            .unwrap();
        assert_eq!(storage.size("k").await.unwrap(), 5);
    }
}
