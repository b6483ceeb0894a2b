//! Key layout and encoding for catalog partitions.
//!
//! Partition structure:
//! - `providers`: {namespace}/{name}/{version}/{platform} -> ProviderRecord (JSON)
//! - `provider_ids`: id:{uuid} -> provider identity key (string)
//! - `jobs`: u64 (big-endian) -> Job (JSON)
//! - `job_items`: job u64 (big-endian) ++ item u32 (big-endian) -> JobItem (JSON)
//! - `meta`: meta:{key} -> value (string)
//!
//! Jobs use big-endian sequence keys so a forward range scan yields creation
//! order; items use the same trick within a job prefix.

use crate::catalog::models::ProviderIdentity;

pub fn encode_provider_key(identity: &ProviderIdentity) -> Vec<u8> {
    identity.key().into_bytes()
}

/// Prefix matching every platform row of one `(namespace, name, version)`.
pub fn encode_version_prefix(namespace: &str, name: &str, version: &str) -> Vec<u8> {
    format!("{}/{}/{}/", namespace, name, version).into_bytes()
}

/// Prefix matching every row of one `(namespace, name)`.
pub fn encode_source_prefix(namespace: &str, name: &str) -> Vec<u8> {
    format!("{}/{}/", namespace, name).into_bytes()
}

pub fn encode_provider_id_key(id: &str) -> Vec<u8> {
    format!("id:{}", id).into_bytes()
}

pub fn encode_job_key(job_id: u64) -> [u8; 8] {
    job_id.to_be_bytes()
}

pub fn decode_job_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub fn encode_item_key(job_id: u64, seq: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&job_id.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

pub fn encode_item_prefix(job_id: u64) -> [u8; 8] {
    job_id.to_be_bytes()
}

pub fn decode_item_key(key: &[u8]) -> Option<(u64, u32)> {
    if key.len() != 12 {
        return None;
    }
    let job = u64::from_be_bytes(key[..8].try_into().ok()?);
    let seq = u32::from_be_bytes(key[8..].try_into().ok()?);
    Some((job, seq))
}

pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_key_round_trip() {
        let identity = ProviderIdentity::new("hashicorp", "random", "3.5.0", "linux_amd64");
        let key = encode_provider_key(&identity);
        assert_eq!(key, b"hashicorp/random/3.5.0/linux_amd64");
    }

    #[test]
    fn version_prefix_has_trailing_slash() {
        // The trailing slash keeps "random" from matching "random2".
        let prefix = encode_source_prefix("hashicorp", "random");
        assert_eq!(prefix, b"hashicorp/random/");
    }

    #[test]
    fn job_keys_sort_by_creation() {
        assert!(encode_job_key(1) < encode_job_key(2));
        assert!(encode_job_key(255) < encode_job_key(256));
        assert_eq!(decode_job_key(&encode_job_key(42)), Some(42));
    }

    #[test]
    fn item_keys_sort_within_job() {
        assert!(encode_item_key(7, 0) < encode_item_key(7, 1));
        assert!(encode_item_key(7, 9) < encode_item_key(8, 0));
        assert_eq!(decode_item_key(&encode_item_key(7, 3)), Some((7, 3)));
        assert_eq!(decode_item_key(b"short"), None);
    }

    #[test]
    fn item_prefix_matches_only_its_job() {
        let prefix = encode_item_prefix(7);
        let key = encode_item_key(7, 12);
        assert!(key.starts_with(&prefix));
        let other = encode_item_key(8, 0);
        assert!(!other.starts_with(&prefix));
    }
}
