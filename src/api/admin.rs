//! Admin surface: definition loading, job control, provider management,
//! stats, and the redacted config view.
//!
//! Every mutation is stamped with the caller identity from the
//! `X-Terracache-Caller` header and handed to the audit sink. Authentication
//! itself lives outside the core.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::warn;

use super::audit::AuditRecord;
use super::error::ApiError;
use super::models::{
    DefinitionsLoadedResponse, FlagsRequest, JobListResponse, JobView, ProviderListResponse,
    RetryResponse, StatsResponse, StatsTotals,
};
use super::state::AppState;
use crate::catalog::{JobStatus, ProviderFilter};
use crate::definitions::DefinitionSet;
use crate::humanize::ByteSize;
use crate::processor::JOB_TYPE_PRELOAD;

const MAX_DEFINITIONS_BYTES: usize = 1024 * 1024;
const CALLER_HEADER: &str = "x-terracache-caller";

fn caller(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Load a definitions document and enqueue a pre-load job
/// (POST /admin/definitions).
pub async fn load_definitions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller(&headers);

    let raw = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes();
    if raw.len() > MAX_DEFINITIONS_BYTES {
        return Err(ApiError::InvalidInput(format!(
            "definitions exceed {} bytes",
            MAX_DEFINITIONS_BYTES
        )));
    }
    let text = std::str::from_utf8(&raw)
        .map_err(|_| ApiError::InvalidInput("definitions must be UTF-8".to_string()))?;

    let set = DefinitionSet::parse(text)?;
    let items = set.items();
    let job = state.catalog.create_job(JOB_TYPE_PRELOAD, &items).await?;

    state
        .audit
        .record(AuditRecord {
            caller,
            action: "load_definitions",
            detail: format!("job {} with {} items", job.id, items.len()),
        })
        .await;

    Ok((
        StatusCode::ACCEPTED,
        Json(DefinitionsLoadedResponse {
            job_id: job.id,
            providers: set.blocks.len(),
            total_items: items.len(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// List jobs newest-first (GET /admin/jobs).
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let status = query.status.as_deref().map(parse_job_status).transpose()?;
    let jobs = state.catalog.list_jobs(status, query.limit, query.offset)?;
    Ok(Json(JobListResponse {
        jobs: jobs
            .into_iter()
            .map(|job| JobView::from_job(job, None))
            .collect(),
    }))
}

/// One job with its items (GET /admin/jobs/{id}).
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobView>, ApiError> {
    let job = state
        .catalog
        .get_job(id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {}", id)))?;
    let items = state.catalog.list_items(id)?;
    Ok(Json(JobView::from_job(job, Some(items))))
}

/// Reset failed items and re-open the job (POST /admin/jobs/{id}/retry).
pub async fn retry_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<RetryResponse>, ApiError> {
    let caller = caller(&headers);
    let reset_items = state.processor.retry_job(id).await?;
    state
        .audit
        .record(AuditRecord {
            caller,
            action: "retry_job",
            detail: format!("job {} ({} items reset)", id, reset_items),
        })
        .await;
    Ok(Json(RetryResponse {
        job_id: id,
        reset_items,
    }))
}

/// Cancel a pending or running job (POST /admin/jobs/{id}/cancel).
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let caller = caller(&headers);
    state.processor.cancel_job(id).await?;
    state
        .audit
        .record(AuditRecord {
            caller,
            action: "cancel_job",
            detail: format!("job {}", id),
        })
        .await;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ProviderListQuery {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// Filtered provider listing (GET /admin/providers).
pub async fn list_providers(
    State(state): State<AppState>,
    Query(query): Query<ProviderListQuery>,
) -> Result<Json<ProviderListResponse>, ApiError> {
    let filter = ProviderFilter {
        namespace: query.namespace,
        name: query.name,
        limit: query.limit,
        offset: query.offset,
    };
    let (providers, total) = state.catalog.list_providers(&filter)?;
    Ok(Json(ProviderListResponse {
        providers,
        total,
        limit: if filter.limit == 0 { 50 } else { filter.limit },
        offset: filter.offset,
    }))
}

/// Delete a provider row and its archive (DELETE /admin/providers/{id}).
///
/// The catalog row goes first; blob removal is best-effort afterwards so a
/// failure cannot strand an uncatalogued object key.
pub async fn delete_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = caller(&headers);
    let record = state
        .catalog
        .delete_provider(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("provider {}", id)))?;

    if let Err(err) = state.storage.delete(&record.storage_key).await {
        warn!(key = %record.storage_key, error = %err, "Blob removal after delete failed");
    }
    invalidate_listing_caches(&state, &record.identity.namespace, &record.identity.name).await;

    state
        .audit
        .record(AuditRecord {
            caller,
            action: "delete_provider",
            detail: record.identity.key(),
        })
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle deprecated/blocked flags (PATCH /admin/providers/{id}/flags).
pub async fn set_flags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(flags): Json<FlagsRequest>,
) -> Result<Json<crate::catalog::ProviderRecord>, ApiError> {
    let caller = caller(&headers);
    let record = state
        .catalog
        .set_provider_flags(&id, flags.deprecated, flags.blocked)
        .await?;
    invalidate_listing_caches(&state, &record.identity.namespace, &record.identity.name).await;

    state
        .audit
        .record(AuditRecord {
            caller,
            action: "set_provider_flags",
            detail: format!(
                "{} deprecated={} blocked={}",
                record.identity.key(),
                record.deprecated,
                record.blocked
            ),
        })
        .await;
    Ok(Json(record))
}

/// Operational counters across components (GET /admin/stats).
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let cache = state.cache.stats().await;
    let auto_download = state.autoloader.stats();
    let processor = state.processor.metrics();
    let catalog = state.catalog.stats()?;

    let totals = StatsTotals {
        cache_size: ByteSize(cache.size_bytes),
        cache_capacity: ByteSize(cache.max_bytes),
        bytes_downloaded: ByteSize(
            processor.bytes_downloaded + auto_download.bytes_downloaded,
        ),
    };

    Ok(Json(StatsResponse {
        cache,
        auto_download,
        processor,
        catalog,
        api: state.metrics.snapshot(),
        totals,
    }))
}

/// The effective configuration, secrets omitted (GET /admin/config).
pub async fn config_view(State(state): State<AppState>) -> Json<crate::config::Config> {
    // Secret fields are #[serde(skip)] on the config structs.
    Json(state.config.as_ref().clone())
}

async fn invalidate_listing_caches(state: &AppState, namespace: &str, name: &str) {
    let keys = [
        format!("/v1/providers/{}/{}/versions", namespace, name),
        format!(
            "/{}/{}/{}/index.json",
            state.config.server.hostname, namespace, name
        ),
    ];
    for key in keys {
        if let Err(err) = state.cache.delete(&key).await {
            warn!(key, error = %err, "Cache invalidation failed");
        }
    }
}

fn parse_job_status(raw: &str) -> Result<JobStatus, ApiError> {
    match raw {
        "pending" => Ok(JobStatus::Pending),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        other => Err(ApiError::InvalidInput(format!(
            "unknown job status '{}'",
            other
        ))),
    }
}
