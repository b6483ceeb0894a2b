use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorBody;
use crate::autoload::AutoloadError;
use crate::cache::CacheError;
use crate::catalog::CatalogError;
use crate::definitions::DefinitionError;
use crate::processor::ProcessorError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("upstream deadline exceeded")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        // The registry protocol's error shape: {"errors": ["..."]}
        let body = ErrorBody {
            errors: vec![self.to_string()],
        };
        (status, Json(body)).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::JobNotFound(id) => ApiError::NotFound(format!("job {}", id)),
            CatalogError::ProviderNotFound(id) => ApiError::NotFound(format!("provider {}", id)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(key) => ApiError::NotFound(key),
            StorageError::InvalidKey(message) => ApiError::InvalidInput(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AutoloadError> for ApiError {
    fn from(value: AutoloadError) -> Self {
        match value {
            AutoloadError::Disabled => ApiError::NotFound("auto-download disabled".to_string()),
            AutoloadError::NotFound(what) => ApiError::NotFound(what),
            AutoloadError::NegativeCached { identity, .. } => ApiError::NotFound(identity),
            AutoloadError::NamespaceBlocked(ns) => ApiError::Forbidden(ns),
            AutoloadError::RateLimited => ApiError::RateLimited,
            AutoloadError::DeadlineExceeded => ApiError::Timeout,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ProcessorError> for ApiError {
    fn from(value: ProcessorError) -> Self {
        match value {
            ProcessorError::JobNotFound { id } => ApiError::NotFound(format!("job {}", id)),
            ProcessorError::InvalidState { id, status } => {
                ApiError::Conflict(format!("job {} is {}", id, status))
            }
            ProcessorError::Catalog(inner) => inner.into(),
        }
    }
}

impl From<DefinitionError> for ApiError {
    fn from(value: DefinitionError) -> Self {
        ApiError::InvalidInput(value.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(value: CacheError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::Internal(value.to_string())
    }
}
