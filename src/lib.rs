//! School tenancy: multi-tenant backend core. Requests are routed to a per-tenant
//! PostgreSQL database, with the data model registered lazily on each connection.

pub mod binder;
pub mod config;
pub mod connection;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod shutdown;
pub mod sql;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod tenant;

pub use binder::{Model, ModelBinder};
pub use config::{load_registry, NewTenant, PoolSettings, Settings, TenantConfig, TenantSettings};
pub use connection::{
    ConnectionCache, ConnectionEvent, ConnectionStatus, Connector, DatabaseHandle, PgConnector, ReadyState,
    TenantConnection,
};
pub use error::{AppError, ConfigError, RegisterError, SchemaError, TenantError};
pub use extractors::{ModelAccessor, TenantContext, TenantSource};
pub use middleware::{identify_tenant, require_tenant};
pub use response::{success_many, success_one};
pub use routes::router;
pub use schema::{ModelName, ModelSchema, SchemaRegistry};
pub use shutdown::shutdown_signal;
pub use state::AppState;
pub use telemetry::init_tracing;
pub use tenant::{TenantDescriptor, TenantRegistry, DEFAULT_TENANT_ID};
