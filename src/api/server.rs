use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::admin;
use super::audit::LogAuditSink;
use super::services;
use super::state::AppState;
use crate::autoload::Autoloader;
use crate::cache::{NoopCache, ResponseCache, TieredCache};
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::processor::JobProcessor;
use crate::registry::RegistryClient;
use crate::storage::ObjectStorage;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const WARMUP_MAX_ITEMS: usize = 256;

pub async fn run(address: Option<SocketAddr>, config_path: Option<PathBuf>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = match config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let bind_addr = address.unwrap_or(config.server.bind_addr);

    let root = CancellationToken::new();

    info!(path = %config.server.catalog_path.display(), "Opening catalog");
    let catalog = Arc::new(CatalogStore::open(&config.server.catalog_path)?);

    let storage = Arc::new(ObjectStorage::from_config(&config.storage)?);
    let registry = Arc::new(RegistryClient::new(
        &config.upstream,
        config.processor.retry_attempts,
    )?);

    let cache: Arc<dyn ResponseCache> =
        if config.cache.memory_size_mb == 0 && config.cache.disk_size_gb == 0 {
            info!("Response cache disabled");
            Arc::new(NoopCache)
        } else {
            let tiered = Arc::new(TieredCache::from_config(&config.cache)?);
            tiered.spawn_sweepers(
                root.child_token(),
                config.cache.memory_sweep_interval(),
                config.cache.disk_sweep_interval(),
            );
            let warmed = tiered.warmup(WARMUP_MAX_ITEMS).await;
            info!(warmed, "Response cache ready");
            tiered
        };

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
    let processor_handle = tokio::spawn(Arc::clone(&processor).run());

    let state = AppState::new(
        Arc::new(config),
        Arc::clone(&catalog),
        storage,
        cache,
        autoloader,
        processor,
        Arc::new(LogAuditSink),
    );

    let app = router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    info!(address = %bind_addr, "terracache listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown: stop claiming jobs, drain workers, flush the catalog.
    root.cancel();
    let _ = processor_handle.await;
    catalog.persist()?;
    info!("Shutdown complete");

    Ok(())
}

/// The full route table. Static prefixes (`/v1`, `/admin`, `/blobs`) win over
/// the mirror protocol's `{hostname}` wildcard at the first segment.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/.well-known/terraform.json",
            get(services::service_discovery),
        )
        .route(
            "/v1/providers/{namespace}/{name}/versions",
            get(services::versions),
        )
        .route(
            "/v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}",
            get(services::download_meta),
        )
        .route("/blobs/{*key}", get(services::blob))
        .route("/healthz", get(services::healthz))
        .route("/admin/definitions", post(admin::load_definitions))
        .route("/admin/jobs", get(admin::list_jobs))
        .route("/admin/jobs/{id}", get(admin::get_job))
        .route("/admin/jobs/{id}/retry", post(admin::retry_job))
        .route("/admin/jobs/{id}/cancel", post(admin::cancel_job))
        .route("/admin/providers", get(admin::list_providers))
        .route("/admin/providers/{id}", delete(admin::delete_provider))
        .route("/admin/providers/{id}/flags", patch(admin::set_flags))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/config", get(admin::config_view))
        .route(
            "/{hostname}/{namespace}/{name}/{file}",
            get(services::mirror),
        )
        .with_state(state)
        // Transparent gzip/deflate/brotli request decompression for admin
        // definition uploads.
        .layer(RequestDecompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
