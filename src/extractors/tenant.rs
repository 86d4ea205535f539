//! Request-scoped tenant context and model accessor.

use crate::binder::{Model, ModelBinder};
use crate::error::AppError;
use crate::schema::ModelName;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

/// Header name for tenant id.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Which signal identified the tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantSource {
    Header,
    Subdomain,
    Query,
    Body,
    Transaction,
    Default,
}

/// Hands out models bound to one tenant. Controllers never see connections.
#[derive(Clone)]
pub struct ModelAccessor {
    tenant_id: String,
    binder: ModelBinder,
}

impl ModelAccessor {
    pub fn new(tenant_id: impl Into<String>, binder: ModelBinder) -> Self {
        ModelAccessor {
            tenant_id: tenant_id.into(),
            binder,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub async fn get(&self, model_name: &str) -> Result<Model, AppError> {
        self.binder.get_model(&self.tenant_id, model_name).await
    }

    pub async fn model(&self, name: ModelName) -> Result<Model, AppError> {
        self.binder.model(&self.tenant_id, name).await
    }

    pub async fn models(&self, model_names: &[&str]) -> Result<Vec<Model>, AppError> {
        self.binder.get_models(&self.tenant_id, model_names).await
    }
}

/// Attached to every request by the identification middleware.
#[derive(Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub source: TenantSource,
    pub accessor: ModelAccessor,
}

impl TenantContext {
    pub async fn get_model(&self, model_name: &str) -> Result<Model, AppError> {
        self.accessor.get(model_name).await
    }
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant_id", &self.tenant_id)
            .field("source", &self.source)
            .finish()
    }
}

/// Fails with a configuration error when the identification layer did not run.
#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .ok_or(AppError::MissingTenantContext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn missing_context_is_a_configuration_error() {
        let (mut parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let err = TenantContext::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::MissingTenantContext));
        assert_eq!(err.status_and_code().1, "tenant_context_missing");
    }
}
