//! PostgreSQL-backed tenant connections.

use super::{ConnectionEvent, Connector, DatabaseHandle, ReadyState};
use crate::config::PoolSettings;
use crate::error::{SchemaError, TenantError};
use crate::schema::ModelSchema;
use crate::store::ensure_database_exists;
use crate::tenant::TenantDescriptor;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// SQLSTATEs raised when another session creates the same table or index concurrently.
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";

/// Opens one `PgPool` per tenant database.
#[derive(Clone, Debug, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        PgConnector
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(
        &self,
        tenant: &TenantDescriptor,
        pool: &PoolSettings,
    ) -> Result<Arc<dyn DatabaseHandle>, TenantError> {
        let options = PgConnectOptions::from_str(&tenant.connection_uri).map_err(|e| TenantError::Misconfigured {
            tenant: tenant.tenant_id.clone(),
            reason: format!("invalid connection uri: {}", e),
        })?;
        if pool.create_missing_databases {
            ensure_database_exists(&tenant.tenant_id, &tenant.connection_uri).await?;
        }
        let pg = PgPoolOptions::new()
            .min_connections(pool.min_connections)
            .max_connections(pool.max_connections)
            .idle_timeout(pool.idle_timeout)
            .acquire_timeout(pool.connect_timeout)
            .connect_with(options.clone())
            .await
            .map_err(|e| TenantError::Unavailable {
                tenant: tenant.tenant_id.clone(),
                reason: e.to_string(),
            })?;
        let handle = PgTenantConnection::start(&tenant.tenant_id, &options, pg, pool.heartbeat_interval);
        Ok(Arc::new(handle))
    }
}

struct Shared {
    state: Mutex<ReadyState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn set(&self, state: ReadyState) -> ReadyState {
        std::mem::replace(&mut *self.state.lock().unwrap_or_else(PoisonError::into_inner), state)
    }

    fn get(&self) -> ReadyState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// A tenant pool plus the heartbeat that turns pool failures into lifecycle events.
pub struct PgTenantConnection {
    tenant_id: String,
    pool: PgPool,
    host: String,
    database: Option<String>,
    shared: Arc<Shared>,
    heartbeat: Option<JoinHandle<()>>,
}

impl PgTenantConnection {
    fn start(tenant_id: &str, options: &PgConnectOptions, pool: PgPool, heartbeat_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            state: Mutex::new(ReadyState::Connected),
            events,
        });
        let heartbeat = (!heartbeat_interval.is_zero()).then(|| {
            tokio::spawn(heartbeat(
                tenant_id.to_string(),
                pool.clone(),
                shared.clone(),
                heartbeat_interval,
            ))
        });
        PgTenantConnection {
            tenant_id: tenant_id.to_string(),
            pool,
            host: options.get_host().to_string(),
            database: options.get_database().map(String::from),
            shared,
            heartbeat,
        }
    }
}

async fn heartbeat(tenant_id: String, pool: PgPool, shared: Arc<Shared>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if pool.is_closed() {
            return;
        }
        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            tracing::warn!(tenant = %tenant_id, error = %e, "tenant heartbeat failed");
            shared.set(ReadyState::Disconnected);
            shared.emit(ConnectionEvent::Error(e.to_string()));
            return;
        }
    }
}

fn schema_error(schema: &ModelSchema, e: sqlx::Error) -> SchemaError {
    let concurrent = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == DUPLICATE_TABLE || code == UNIQUE_VIOLATION)
        .unwrap_or(false);
    if concurrent {
        SchemaError::AlreadyRegistered(schema.collection().to_string())
    } else {
        SchemaError::Db {
            model: schema.collection().to_string(),
            source: e,
        }
    }
}

#[async_trait]
impl DatabaseHandle for PgTenantConnection {
    fn ready_state(&self) -> ReadyState {
        self.shared.get()
    }

    fn host(&self) -> Option<String> {
        Some(self.host.clone())
    }

    fn name(&self) -> Option<String> {
        self.database.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    async fn register_schema(&self, schema: &ModelSchema) -> Result<(), SchemaError> {
        for statement in schema.ddl() {
            tracing::debug!(tenant = %self.tenant_id, model = %schema.name, "{}", statement);
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| schema_error(schema, e))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), String> {
        let previous = self.shared.set(ReadyState::Disconnecting);
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        self.pool.close().await;
        self.shared.set(ReadyState::Disconnected);
        if previous != ReadyState::Disconnected {
            self.shared.emit(ConnectionEvent::Disconnected);
        }
        Ok(())
    }

    fn pg_pool(&self) -> Option<&PgPool> {
        Some(&self.pool)
    }
}

impl Drop for PgTenantConnection {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}
