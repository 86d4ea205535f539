//! Shared application state for all routes.

use crate::binder::ModelBinder;
use crate::config::PoolSettings;
use crate::connection::{ConnectionCache, Connector};
use crate::schema::SchemaRegistry;
use crate::tenant::TenantRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    /// Constructed once per process; shared by the binder and the admin routes.
    pub cache: ConnectionCache,
    pub binder: ModelBinder,
    /// Largest request body the identification layer buffers to look for `tenantId`.
    pub body_limit: usize,
}

impl AppState {
    /// Wire registry, cache and binder over the full model catalog.
    pub fn new(
        registry: Arc<TenantRegistry>,
        connector: Arc<dyn Connector>,
        pool: PoolSettings,
        body_limit: usize,
    ) -> Self {
        let cache = ConnectionCache::new(registry.clone(), connector, pool);
        let binder = ModelBinder::new(cache.clone(), Arc::new(SchemaRegistry::standard()));
        AppState {
            registry,
            cache,
            binder,
            body_limit,
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        self.binder.schemas()
    }
}
