//! Deterministic object-store key construction.
//!
//! Keys are the only coupling between the blob store and the catalog, so the
//! layout is fixed here and nowhere else:
//!
//! - provider archive: `providers/{hostname}/{namespace}/{name}/{version}/{os}_{arch}/{filename}`
//! - catalog backup:   `backups/{timestamp}.db`

use chrono::{DateTime, Utc};

use super::StorageError;

/// Key for a provider archive blob. Identical identities always produce the
/// same key; distinct identities never collide.
pub fn provider_archive(
    hostname: &str,
    namespace: &str,
    name: &str,
    version: &str,
    platform: &str,
    filename: &str,
) -> Result<String, StorageError> {
    for part in [hostname, namespace, name, version, platform, filename] {
        validate_component(part)?;
    }
    Ok(format!(
        "providers/{}/{}/{}/{}/{}/{}",
        hostname, namespace, name, version, platform, filename
    ))
}

/// Prefix holding every archive for one `(namespace, name, version, platform)`.
pub fn provider_archive_prefix(
    hostname: &str,
    namespace: &str,
    name: &str,
    version: &str,
    platform: &str,
) -> Result<String, StorageError> {
    for part in [hostname, namespace, name, version, platform] {
        validate_component(part)?;
    }
    Ok(format!(
        "providers/{}/{}/{}/{}/{}",
        hostname, namespace, name, version, platform
    ))
}

/// Key for a catalog backup snapshot.
pub fn backup(timestamp: DateTime<Utc>) -> String {
    format!("backups/{}.db", timestamp.format("%Y%m%d%H%M%S"))
}

fn validate_component(part: &str) -> Result<(), StorageError> {
    if part.is_empty() {
        return Err(StorageError::InvalidKey("empty key component".to_string()));
    }
    if part == "." || part == ".." {
        return Err(StorageError::InvalidKey(format!(
            "traversal component in key: {:?}",
            part
        )));
    }
    if part.contains('/') || part.contains('\\') {
        return Err(StorageError::InvalidKey(format!(
            "separator in key component: {:?}",
            part
        )));
    }
    Ok(())
}
