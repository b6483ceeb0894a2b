//! Protocol serving: origin-registry and network-mirror endpoints.
//!
//! Both protocols read the catalog and presign archive URLs out of object
//! storage. Small JSON documents are cached keyed by canonical request path;
//! cache writes are best-effort. On a catalog miss with auto-download
//! enabled, the origin download endpoint runs the coordinator synchronously
//! and the versions endpoint consults the upstream list.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::debug;

use super::error::ApiError;
use super::models::{
    DownloadResponse, HealthResponse, MirrorArchive, MirrorIndexResponse, MirrorPackagesResponse,
    MirrorVersion, PlatformEntry, ServiceDiscovery, SigningKeys, VersionEntry, VersionsResponse,
    ZH_PREFIX,
};
use super::state::AppState;
use crate::catalog::{ProviderIdentity, ProviderRecord};

/// Service discovery document (GET /.well-known/terraform.json).
pub async fn service_discovery() -> Json<ServiceDiscovery> {
    Json(ServiceDiscovery {
        providers_v1: "/v1/providers/".to_string(),
    })
}

/// Origin protocol versions list
/// (GET /v1/providers/{namespace}/{name}/versions).
pub async fn versions(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state.metrics.request();
    let cache_key = format!("/v1/providers/{}/{}/versions", namespace, name);
    if let Some(hit) = state.cache.get(&cache_key).await {
        state.metrics.response_cache_hit();
        return Ok(bytes_response(hit.data, &hit.content_type));
    }

    let rows = state.catalog.list_source_rows(&namespace, &name)?;
    let response = if rows.is_empty() {
        // Empty catalog: consult the coordinator for the upstream list when
        // auto-download is on, otherwise 404.
        if !state.autoloader.enabled() {
            return Err(ApiError::NotFound(format!("{}/{}", namespace, name)));
        }
        state.metrics.autoload_triggered();
        let upstream = state.autoloader.available_versions(&namespace, &name).await?;
        if upstream.is_empty() {
            return Err(ApiError::NotFound(format!("{}/{}", namespace, name)));
        }
        VersionsResponse {
            versions: upstream
                .into_iter()
                .map(|v| VersionEntry {
                    protocols: default_protocols(v.protocols),
                    platforms: v
                        .platforms
                        .into_iter()
                        .map(|p| PlatformEntry {
                            os: p.os,
                            arch: p.arch,
                        })
                        .collect(),
                    version: v.version,
                })
                .collect(),
        }
    } else {
        let response = build_versions_response(rows);
        // Known rows that are all blocked stay hidden; an admin block must
        // never fall through to the upstream proxy.
        if response.versions.is_empty() {
            return Err(ApiError::NotFound(format!("{}/{}", namespace, name)));
        }
        response
    };

    let body = serde_json::to_vec(&response)?;
    cache_write(&state, &cache_key, body.clone()).await;
    Ok(bytes_response(
        Bytes::from(body),
        mime::APPLICATION_JSON.as_ref(),
    ))
}

/// Origin protocol download metadata
/// (GET /v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}).
pub async fn download_meta(
    State(state): State<AppState>,
    Path((namespace, name, version, os, arch)): Path<(String, String, String, String, String)>,
) -> Result<Json<DownloadResponse>, ApiError> {
    state.metrics.request();
    let identity = ProviderIdentity::for_platform(&namespace, &name, &version, &os, &arch);

    let record = match state.catalog.lookup_provider(&identity)? {
        Some(record) => record,
        None => {
            if !state.autoloader.enabled() {
                return Err(ApiError::NotFound(identity.key()));
            }
            state.metrics.autoload_triggered();
            Arc::clone(&state.autoloader)
                .download_all_platforms(&namespace, &name, &version, &os, &arch)
                .await?
        }
    };

    if record.blocked {
        return Err(ApiError::Forbidden(format!(
            "provider {} is blocked",
            identity.key()
        )));
    }

    let download_url = state.storage.presign(&record.storage_key, None).await?;
    Ok(Json(DownloadResponse {
        protocols: default_protocols(record.protocols),
        os,
        arch,
        filename: record.filename,
        download_url,
        shasum_url: String::new(),
        shasum_signature_url: String::new(),
        shasum: record.shasum,
        signing_keys: SigningKeys::default(),
    }))
}

/// Network-mirror protocol (GET /{hostname}/{namespace}/{name}/{file}).
///
/// The trailing component is parsed by hand: `index.json` is the version
/// index, anything else ending in `.json` is a `{version}.json` package
/// document. Suffix routing alone cannot tell them apart.
pub async fn mirror(
    State(state): State<AppState>,
    Path((hostname, namespace, name, file)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    state.metrics.request();
    if file == "index.json" {
        return mirror_index(&state, &hostname, &namespace, &name).await;
    }
    match file.strip_suffix(".json") {
        Some(version) if !version.is_empty() => {
            mirror_packages(&state, &namespace, &name, version).await
        }
        _ => Err(ApiError::NotFound(format!(
            "{}/{}/{}/{}",
            hostname, namespace, name, file
        ))),
    }
}

async fn mirror_index(
    state: &AppState,
    hostname: &str,
    namespace: &str,
    name: &str,
) -> Result<Response, ApiError> {
    let cache_key = format!("/{}/{}/{}/index.json", hostname, namespace, name);
    if let Some(hit) = state.cache.get(&cache_key).await {
        state.metrics.response_cache_hit();
        return Ok(bytes_response(hit.data, &hit.content_type));
    }

    let versions = state.catalog.list_versions(namespace, name)?;
    if versions.is_empty() {
        return Err(ApiError::NotFound(format!("{}/{}", namespace, name)));
    }

    let response = MirrorIndexResponse {
        versions: versions
            .into_iter()
            .map(|v| (v, MirrorVersion::default()))
            .collect::<BTreeMap<_, _>>(),
    };
    let body = serde_json::to_vec(&response)?;
    cache_write(state, &cache_key, body.clone()).await;
    Ok(bytes_response(
        Bytes::from(body),
        mime::APPLICATION_JSON.as_ref(),
    ))
}

async fn mirror_packages(
    state: &AppState,
    namespace: &str,
    name: &str,
    version: &str,
) -> Result<Response, ApiError> {
    let rows = state.catalog.list_platform_rows(namespace, name, version)?;
    let mut archives = BTreeMap::new();
    for row in rows.into_iter().filter(|row| !row.blocked) {
        let url = state.storage.presign(&row.storage_key, None).await?;
        archives.insert(
            row.identity.platform.clone(),
            MirrorArchive {
                url,
                hashes: vec![format!("{}{}", ZH_PREFIX, row.shasum)],
            },
        );
    }
    if archives.is_empty() {
        return Err(ApiError::NotFound(format!(
            "{}/{} {}",
            namespace, name, version
        )));
    }

    // Presigned URLs are short-lived, so package documents skip the response
    // cache.
    Ok(Json(MirrorPackagesResponse { archives }).into_response())
}

/// Archive serving for the local and in-memory storage backends
/// (GET /blobs/{key}).
pub async fn blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    state.metrics.request();
    let data = state.storage.download(&key).await?;
    let content_type = if key.ends_with(".zip") {
        "application/zip"
    } else if key.ends_with(".json") {
        mime::APPLICATION_JSON.as_ref()
    } else {
        mime::APPLICATION_OCTET_STREAM.as_ref()
    };
    Ok(bytes_response(data, content_type))
}

/// Component health (GET /healthz).
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "catalog".to_string(),
        match state.catalog.stats() {
            Ok(_) => "healthy".to_string(),
            Err(_) => "unhealthy".to_string(),
        },
    );
    components.insert("storage".to_string(), "healthy".to_string());
    components.insert("cache".to_string(), "healthy".to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (status_code, Json(response))
}

fn bytes_response(data: Bytes, content_type: &str) -> Response {
    ([(header::CONTENT_TYPE, content_type.to_string())], data).into_response()
}

async fn cache_write(state: &AppState, key: &str, body: Vec<u8>) {
    if let Err(err) = state
        .cache
        .set(
            key,
            Bytes::from(body),
            mime::APPLICATION_JSON.as_ref(),
            None,
        )
        .await
    {
        debug!(key, error = %err, "Response cache write failed");
    }
}

/// Aggregate catalog rows into the origin-protocol versions document.
/// Blocked rows are not advertised.
fn build_versions_response(rows: Vec<ProviderRecord>) -> VersionsResponse {
    let mut by_version: BTreeMap<String, (Vec<String>, Vec<PlatformEntry>)> = BTreeMap::new();
    for row in rows.into_iter().filter(|row| !row.blocked) {
        let entry = by_version.entry(row.identity.version.clone()).or_default();
        for protocol in row.protocols {
            if !entry.0.contains(&protocol) {
                entry.0.push(protocol);
            }
        }
        if let Some((os, arch)) = row.identity.os_arch() {
            let platform = PlatformEntry {
                os: os.to_string(),
                arch: arch.to_string(),
            };
            if !entry.1.contains(&platform) {
                entry.1.push(platform);
            }
        }
    }

    let mut versions: Vec<String> = by_version.keys().cloned().collect();
    versions.sort_by(|a, b| match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        _ => b.cmp(a),
    });

    VersionsResponse {
        versions: versions
            .into_iter()
            .filter_map(|version| {
                by_version.remove(&version).map(|(protocols, platforms)| VersionEntry {
                    protocols: default_protocols(protocols),
                    platforms,
                    version,
                })
            })
            .collect(),
    }
}

fn default_protocols(protocols: Vec<String>) -> Vec<String> {
    if protocols.is_empty() {
        vec!["5.0".to_string()]
    } else {
        protocols
    }
}
