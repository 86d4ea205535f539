//! School ERP server: loads tenants, serves the tenant-scoped API, drains tenant pools on exit.
//!
//! Run from repo root: `cargo run -p server`

use school_tenancy::{
    init_tracing, load_registry, router, shutdown, AppState, PgConnector, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("school_tenancy=info,server=info,tower_http=info");

    let settings = Settings::from_env();
    let registry = Arc::new(load_registry(&settings).await?);
    let state = AppState::new(
        registry,
        Arc::new(PgConnector::new()),
        settings.pool.clone(),
        settings.body_limit,
    );
    let cache = state.cache.clone();

    let app = router(state);
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    shutdown::drain(&cache).await;
    Ok(())
}
