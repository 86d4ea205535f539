//! Tenant-scoped routes. Every route runs behind tenant identification; `/api/tenant/*`
//! additionally refuses the default tenant.

use crate::handlers::admin::{current_tenant, reconnect};
use crate::handlers::documents::{create, delete, list, list_models, read, update};
use crate::middleware::{identify_tenant, require_tenant};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub fn tenant_routes(state: AppState) -> Router {
    let explicit_tenant = Router::new()
        .route("/api/tenant", get(current_tenant))
        .route("/api/tenant/reconnect", post(reconnect))
        .route_layer(middleware::from_fn(require_tenant));

    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/:model", get(list).post(create))
        .route("/api/:model/:id", get(read).patch(update).delete(delete))
        .merge(explicit_tenant)
        .route_layer(middleware::from_fn_with_state(state.clone(), identify_tenant))
        .with_state(state)
}
