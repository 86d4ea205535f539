mod admin;
mod common;
mod documents;

pub use admin::admin_routes;
pub use common::common_routes;
pub use documents::tenant_routes;

use crate::state::AppState;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Every route, with request tracing and the body size limit applied.
pub fn router(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(admin_routes(state.clone()))
        .merge(tenant_routes(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
}
