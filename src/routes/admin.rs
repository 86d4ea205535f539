//! Administrative routes: tenant registry and connection monitoring.

use crate::handlers::admin::{close_connection, create_tenant, deactivate_tenant, list_connections, list_tenants};
use crate::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};

pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/admin/tenants", get(list_tenants).post(create_tenant))
        .route("/admin/tenants/:tenant_id/deactivate", post(deactivate_tenant))
        .route("/admin/connections", get(list_connections))
        .route("/admin/connections/:tenant_id", delete(close_connection))
        .with_state(state)
}
