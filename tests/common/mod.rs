//! Shared test harness: an isolated application state wired to in-memory
//! storage plus an optional local mock of the upstream registry.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use terracache::api::audit::LogAuditSink;
use terracache::api::state::AppState;
use terracache::autoload::Autoloader;
use terracache::cache::{DiskCache, MemoryCache, ResponseCache, TieredCache};
use terracache::catalog::CatalogStore;
use terracache::config::Config;
use terracache::processor::JobProcessor;
use terracache::registry::RegistryClient;
use terracache::storage::ObjectStorage;

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub catalog: Arc<CatalogStore>,
    pub storage: Arc<ObjectStorage>,
    pub registry: Arc<RegistryClient>,
    pub autoloader: Arc<Autoloader>,
    pub processor: Arc<JobProcessor>,
    pub root: CancellationToken,
    _dir: TempDir,
}

/// Build a full application from the given config, overriding the catalog
/// and cache paths to a fresh tempdir and storage to in-memory.
pub fn build_harness(mut config: Config) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    config.server.catalog_path = dir.path().join("catalog");
    config.cache.disk_path = dir.path().join("cache");

    let root = CancellationToken::new();
    let catalog = Arc::new(CatalogStore::open(&config.server.catalog_path).expect("catalog"));
    let storage = Arc::new(ObjectStorage::in_memory());
    let registry = Arc::new(
        RegistryClient::new(&config.upstream, config.processor.retry_attempts)
            .expect("registry client"),
    );

    let cache: Arc<dyn ResponseCache> = Arc::new(TieredCache::with_tiers(
        Some(MemoryCache::new(4 * 1024 * 1024)),
        Some(DiskCache::open(&config.cache.disk_path, 64 * 1024 * 1024).expect("disk cache")),
        config.cache.promote_on_hit,
        config.cache.write_through,
        config.cache.default_ttl(),
    ));

    let autoloader = Arc::new(Autoloader::new(
        config.auto_download.clone(),
        Arc::clone(&registry),
        Arc::clone(&storage),
        Arc::clone(&catalog),
        config.server.hostname.clone(),
    ));

    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&catalog),
        Arc::clone(&storage),
        Arc::clone(&registry),
        config.server.hostname.clone(),
        config.processor.clone(),
        root.child_token(),
    ));

    let state = AppState::new(
        Arc::new(config),
        Arc::clone(&catalog),
        Arc::clone(&storage),
        cache,
        Arc::clone(&autoloader),
        Arc::clone(&processor),
        Arc::new(LogAuditSink),
    );

    Harness {
        app: terracache::api::router(state.clone()),
        state,
        catalog,
        storage,
        registry,
        autoloader,
        processor,
        root,
        _dir: dir,
    }
}

/// Deterministic mock archive bytes for a filename.
pub fn mock_archive_bytes(filename: &str) -> Vec<u8> {
    format!("mock archive {}", filename).into_bytes()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn mock_filename(name: &str, version: &str, os: &str, arch: &str) -> String {
    format!("terraform-provider-{}_{}_{}_{}.zip", name, version, os, arch)
}

/// A local stand-in for the upstream origin registry.
///
/// Behavior by provider name:
/// - `missing`: 404 on every endpoint
/// - `bad`: download metadata advertises a bogus shasum
/// - `slow`: the archive response stalls for several seconds
/// - anything else: serves any requested version with consistent hashes
pub struct MockUpstream {
    pub url: String,
    pub addr: SocketAddr,
}

pub async fn spawn_mock_upstream() -> MockUpstream {
    let app = Router::new()
        .route("/v1/providers/{ns}/{name}/versions", get(mock_versions))
        .route(
            "/v1/providers/{ns}/{name}/{version}/download/{os}/{arch}",
            get(mock_download_doc),
        )
        .route("/archives/{file}", get(mock_archive));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream {
        url: format!("http://{}", addr),
        addr,
    }
}

async fn mock_versions(
    Path((_ns, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    if name == "missing" {
        return Err(axum::http::StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({
        "versions": [
            {
                "version": "3.5.0",
                "protocols": ["5.0"],
                "platforms": [
                    {"os": "linux", "arch": "amd64"},
                    {"os": "darwin", "arch": "arm64"}
                ]
            }
        ]
    })))
}

async fn mock_download_doc(
    Path((_ns, name, version, os, arch)): Path<(String, String, String, String, String)>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    if name == "missing" {
        return Err(axum::http::StatusCode::NOT_FOUND);
    }
    let filename = mock_filename(&name, &version, &os, &arch);
    let shasum = if name == "bad" {
        "0".repeat(64)
    } else {
        sha256_hex(&mock_archive_bytes(&filename))
    };
    Ok(Json(serde_json::json!({
        "protocols": ["5.0"],
        "os": os,
        "arch": arch,
        "filename": filename,
        "download_url": format!("/archives/{}", filename),
        "shasum_url": "",
        "shasum_signature_url": "",
        "shasum": shasum,
        "signing_keys": {"gpg_public_keys": []}
    })))
}

async fn mock_archive(Path(file): Path<String>) -> Vec<u8> {
    if file.contains("-slow_") {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    }
    mock_archive_bytes(&file)
}
