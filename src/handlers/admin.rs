//! Tenant administration and connection monitoring handlers.

use crate::config::TenantConfig;
use crate::error::AppError;
use crate::extractors::TenantContext;
use crate::response::{success_many, success_one, success_one_ok};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// Active tenants. Registry only; never touches connections.
pub async fn list_tenants(State(state): State<AppState>) -> impl IntoResponse {
    success_many(state.registry.list_active())
}

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<TenantConfig>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.registry.register(&body.id, body.tenant)?;
    Ok(success_one(tenant))
}

pub async fn deactivate_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.registry.deactivate(&tenant_id)?;
    Ok(success_one_ok(tenant))
}

pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    success_one_ok(state.cache.status())
}

pub async fn close_connection(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if state.cache.close_one(&tenant_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("connection for tenant '{}'", tenant_id)))
    }
}

/// Descriptor and connection status of the request's tenant.
pub async fn current_tenant(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state
        .registry
        .lookup(Some(&ctx.tenant_id))
        .ok_or_else(|| AppError::NotFound(format!("tenant '{}'", ctx.tenant_id)))?;
    let connection = state.cache.status().remove(&ctx.tenant_id);
    Ok(success_one_ok(serde_json::json!({
        "tenant": tenant,
        "source": ctx.source,
        "connection": connection,
    })))
}

/// Drop the tenant's connection and open a fresh one with every model registered.
pub async fn reconnect(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let closed = state.cache.close_one(&ctx.tenant_id).await;
    let connection = state.cache.get_connection(&ctx.tenant_id).await?;
    state.binder.register_all(&connection).await?;
    tracing::info!(tenant = %ctx.tenant_id, closed, "tenant reconnected");
    Ok(success_one_ok(serde_json::json!({
        "closed": closed,
        "connection": state.cache.status().remove(&ctx.tenant_id),
    })))
}
