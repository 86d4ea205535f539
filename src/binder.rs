//! Model binder: tenant connection + schema registry -> bound model.
//!
//! The first request for any model on a connection registers every cataloged schema on
//! it, so references between collections resolve no matter which model was asked for first.

use crate::connection::{ConnectionCache, TenantConnection};
use crate::error::{AppError, SchemaError, TenantError};
use crate::schema::{ModelName, ModelSchema, SchemaRegistry};
use sqlx::PgPool;
use std::sync::Arc;

/// A model schema bound to one tenant's live connection.
#[derive(Clone)]
pub struct Model {
    schema: ModelSchema,
    connection: Arc<TenantConnection>,
}

impl Model {
    pub fn name(&self) -> ModelName {
        self.schema.name
    }

    pub fn collection(&self) -> &'static str {
        self.schema.collection()
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn tenant_id(&self) -> &str {
        self.connection.tenant_id()
    }

    pub fn connection(&self) -> &Arc<TenantConnection> {
        &self.connection
    }

    /// PostgreSQL pool of the tenant database.
    pub fn pool(&self) -> Result<&PgPool, AppError> {
        self.connection.handle().pg_pool().ok_or_else(|| {
            AppError::Tenant(TenantError::Misconfigured {
                tenant: self.tenant_id().to_string(),
                reason: "connection is not PostgreSQL-backed".into(),
            })
        })
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.schema.name)
            .field("tenant_id", &self.tenant_id())
            .finish()
    }
}

#[derive(Clone)]
pub struct ModelBinder {
    cache: ConnectionCache,
    schemas: Arc<SchemaRegistry>,
}

impl ModelBinder {
    pub fn new(cache: ConnectionCache, schemas: Arc<SchemaRegistry>) -> Self {
        ModelBinder { cache, schemas }
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Bound model by name. Unknown names fail before any connection I/O.
    pub async fn get_model(&self, tenant_id: &str, model_name: &str) -> Result<Model, AppError> {
        let schema = self.resolve(tenant_id, model_name)?;
        self.bind(tenant_id, &[schema]).await?.pop().ok_or_else(|| AppError::UnknownModel(model_name.into()))
    }

    pub async fn model(&self, tenant_id: &str, name: ModelName) -> Result<Model, AppError> {
        self.get_model(tenant_id, name.as_str()).await
    }

    /// Several models on the same tenant connection, in the order asked for.
    pub async fn get_models(&self, tenant_id: &str, model_names: &[&str]) -> Result<Vec<Model>, AppError> {
        let schemas = model_names
            .iter()
            .map(|name| self.resolve(tenant_id, name))
            .collect::<Result<Vec<_>, _>>()?;
        self.bind(tenant_id, &schemas).await
    }

    fn resolve(&self, tenant_id: &str, model_name: &str) -> Result<ModelSchema, AppError> {
        match self.schemas.resolve(model_name) {
            Ok(schema) => Ok(*schema),
            Err(e) => {
                tracing::error!(tenant = %tenant_id, model = %model_name, "model schema not found");
                Err(e)
            }
        }
    }

    async fn bind(&self, tenant_id: &str, schemas: &[ModelSchema]) -> Result<Vec<Model>, AppError> {
        let connection = self.cache.get_connection(tenant_id).await?;
        self.register_all(&connection).await?;
        Ok(schemas
            .iter()
            .map(|schema| Model {
                schema: *schema,
                connection: connection.clone(),
            })
            .collect())
    }

    /// Register every schema not yet registered on `connection`. A concurrent registration
    /// reported by the database counts as success.
    pub async fn register_all(&self, connection: &TenantConnection) -> Result<(), AppError> {
        for schema in self.schemas.iter() {
            if connection.is_registered(schema.name) {
                continue;
            }
            match connection.handle().register_schema(schema).await {
                Ok(()) => {}
                Err(SchemaError::AlreadyRegistered(_)) => {
                    tracing::debug!(tenant = %connection.tenant_id(), model = %schema.name, "schema already registered");
                }
                Err(e) => return Err(e.into()),
            }
            if connection.mark_registered(schema.name) {
                tracing::debug!(tenant = %connection.tenant_id(), model = %schema.name, "model registered");
            }
        }
        Ok(())
    }
}
