use thiserror::Error;

use super::models::Config;
use crate::definitions::is_valid_platform;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("namespace '{0}' appears in both allowed_namespaces and blocked_namespaces")]
    ConflictingNamespaceLists(String),

    #[error("invalid auto_download platform '{0}'")]
    InvalidPlatform(String),

    #[error("upstream.url must be an http(s) URL, got '{0}'")]
    InvalidUpstreamUrl(String),

    #[error("storage.presign_ttl_hours must be greater than zero")]
    ZeroPresignTtl,

    #[error("processor.max_concurrent_jobs must be greater than zero")]
    ZeroWorkerPool,

    #[error("auto_download.max_concurrent_downloads must be greater than zero")]
    ZeroDownloadConcurrency,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    for namespace in &config.auto_download.blocked_namespaces {
        if config.auto_download.allowed_namespaces.contains(namespace) {
            return Err(ValidationError::ConflictingNamespaceLists(
                namespace.clone(),
            ));
        }
    }

    for platform in &config.auto_download.platforms {
        if !is_valid_platform(platform) {
            return Err(ValidationError::InvalidPlatform(platform.clone()));
        }
    }

    if !config.upstream.url.starts_with("http://") && !config.upstream.url.starts_with("https://") {
        return Err(ValidationError::InvalidUpstreamUrl(
            config.upstream.url.clone(),
        ));
    }

    if config.storage.presign_ttl_hours == 0 {
        return Err(ValidationError::ZeroPresignTtl);
    }
    if config.processor.max_concurrent_jobs == 0 {
        return Err(ValidationError::ZeroWorkerPool);
    }
    if config.auto_download.max_concurrent_downloads == 0 {
        return Err(ValidationError::ZeroDownloadConcurrency);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn overlapping_namespace_lists_rejected() {
        let mut config = Config::default();
        config.auto_download.allowed_namespaces = vec!["hashicorp".to_string()];
        config.auto_download.blocked_namespaces = vec!["hashicorp".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ConflictingNamespaceLists(_))
        ));
    }

    #[test]
    fn bad_platform_rejected() {
        let mut config = Config::default();
        config.auto_download.platforms = vec!["solaris_sparc".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidPlatform(_))
        ));
    }

    #[test]
    fn bad_upstream_url_rejected() {
        let mut config = Config::default();
        config.upstream.url = "ftp://registry".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidUpstreamUrl(_))
        ));
    }
}
