//! Generic collection handlers: every cataloged model is served under `/api/:model`.

use crate::binder::Model;
use crate::error::AppError;
use crate::extractors::TenantContext;
use crate::response::{success_many, success_one, success_one_ok};
use crate::service::DocumentService;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

/// A URL naming a model outside the catalog is a missing resource, not a programming error.
async fn bound_model(state: &AppState, ctx: &TenantContext, model: &str) -> Result<Model, AppError> {
    if !state.schemas().contains(model) {
        return Err(AppError::NotFound(format!("model '{}'", model)));
    }
    ctx.get_model(model).await
}

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    success_many(state.schemas().iter().copied().collect())
}

pub async fn list(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(model): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let model = bound_model(&state, &ctx, &model).await?;
    let rows = DocumentService::list(&model, state.schemas(), &params).await?;
    Ok(success_many(rows))
}

pub async fn create(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(model): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let model = bound_model(&state, &ctx, &model).await?;
    let row = DocumentService::create(&model, body).await?;
    Ok(success_one(row))
}

pub async fn read(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path((model, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let model = bound_model(&state, &ctx, &model).await?;
    let populate = params.get("populate").map(String::as_str);
    let row = DocumentService::read(&model, state.schemas(), &id, populate).await?;
    Ok(success_one_ok(row))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path((model, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let model = bound_model(&state, &ctx, &model).await?;
    let row = DocumentService::update(&model, &id, body).await?;
    Ok(success_one_ok(row))
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path((model, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let model = bound_model(&state, &ctx, &model).await?;
    DocumentService::delete(&model, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
