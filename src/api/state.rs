use std::sync::Arc;

use crate::autoload::Autoloader;
use crate::cache::ResponseCache;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::observability::ApiMetrics;
use crate::processor::JobProcessor;
use crate::storage::ObjectStorage;

use super::audit::AuditSink;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<CatalogStore>,
    pub storage: Arc<ObjectStorage>,
    pub cache: Arc<dyn ResponseCache>,
    pub autoloader: Arc<Autoloader>,
    pub processor: Arc<JobProcessor>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<ApiMetrics>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<CatalogStore>,
        storage: Arc<ObjectStorage>,
        cache: Arc<dyn ResponseCache>,
        autoloader: Arc<Autoloader>,
        processor: Arc<JobProcessor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            catalog,
            storage,
            cache,
            autoloader,
            processor,
            audit,
            metrics: Arc::new(ApiMetrics::new()),
        }
    }
}
