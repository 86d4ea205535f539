//! Per-tenant database connections: the handle abstraction, its lifecycle events, and the
//! cache that multiplexes one live handle per tenant.

mod cache;
mod postgres;

pub use cache::{ConnectionCache, ConnectionStatus};
pub use postgres::{PgConnector, PgTenantConnection};

use crate::config::PoolSettings;
use crate::error::{SchemaError, TenantError};
use crate::schema::{ModelName, ModelSchema};
use crate::tenant::TenantDescriptor;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Lifecycle status of a database connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Disconnected,
    Connected,
    Connecting,
    Disconnecting,
}

/// Published by a handle after it is handed to the cache. Both variants evict the entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    Disconnected,
}

/// A live connection to one tenant database.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    fn host(&self) -> Option<String>;

    /// Database name.
    fn name(&self) -> Option<String>;

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Materialize one collection on this database. Must be idempotent.
    async fn register_schema(&self, schema: &ModelSchema) -> Result<(), SchemaError>;

    async fn close(&self) -> Result<(), String>;

    /// Underlying pool for query execution, when the handle is PostgreSQL-backed.
    fn pg_pool(&self) -> Option<&PgPool> {
        None
    }
}

/// Opens handles. The cache owns when and how often this is called.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        tenant: &TenantDescriptor,
        pool: &PoolSettings,
    ) -> Result<Arc<dyn DatabaseHandle>, TenantError>;
}

/// A tenant's cached connection plus the set of models already registered on it.
pub struct TenantConnection {
    tenant_id: String,
    generation: u64,
    handle: Arc<dyn DatabaseHandle>,
    registered: Mutex<HashSet<ModelName>>,
}

impl TenantConnection {
    pub(crate) fn new(tenant_id: String, generation: u64, handle: Arc<dyn DatabaseHandle>) -> Self {
        TenantConnection {
            tenant_id,
            generation,
            handle,
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Distinguishes successive connections of the same tenant.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> &Arc<dyn DatabaseHandle> {
        &self.handle
    }

    pub fn ready_state(&self) -> ReadyState {
        self.handle.ready_state()
    }

    pub fn is_registered(&self, name: ModelName) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&name)
    }

    /// Records a registration; returns false if it was already recorded.
    pub(crate) fn mark_registered(&self, name: ModelName) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name)
    }

    /// Registered model names, sorted.
    pub fn registered_models(&self) -> Vec<ModelName> {
        let mut names: Vec<_> = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("tenant_id", &self.tenant_id)
            .field("generation", &self.generation)
            .field("ready_state", &self.handle.ready_state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory `Connector` / `DatabaseHandle` used by unit tests across the crate.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct MockHandle {
        pub tenant: String,
        state: Mutex<ReadyState>,
        events: broadcast::Sender<ConnectionEvent>,
        pub registrations: Mutex<Vec<ModelName>>,
        pub fail_close: bool,
        pub already_registered: bool,
        closes: Arc<AtomicUsize>,
    }

    impl MockHandle {
        /// Simulate a mid-life connection error.
        pub fn fail(&self) {
            *self.state.lock().unwrap() = ReadyState::Disconnected;
            let _ = self.events.send(ConnectionEvent::Error("connection reset".into()));
        }

        pub fn set_state(&self, state: ReadyState) {
            *self.state.lock().unwrap() = state;
        }
    }

    #[async_trait]
    impl DatabaseHandle for MockHandle {
        fn ready_state(&self) -> ReadyState {
            *self.state.lock().unwrap()
        }

        fn host(&self) -> Option<String> {
            Some("mock".into())
        }

        fn name(&self) -> Option<String> {
            Some(self.tenant.clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
            self.events.subscribe()
        }

        async fn register_schema(&self, schema: &ModelSchema) -> Result<(), SchemaError> {
            self.registrations.lock().unwrap().push(schema.name);
            if self.already_registered {
                return Err(SchemaError::AlreadyRegistered(schema.name.to_string()));
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), String> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().unwrap() = ReadyState::Disconnected;
            if self.fail_close {
                return Err("close failed".into());
            }
            let _ = self.events.send(ConnectionEvent::Disconnected);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockConnector {
        pub connects: AtomicUsize,
        pub closes: Arc<AtomicUsize>,
        /// Tenants whose connect attempts fail.
        pub unreachable: Mutex<HashSet<String>>,
        /// Tenants whose handles fail to close.
        pub fail_close: Mutex<HashSet<String>>,
        pub already_registered: bool,
        /// Connect never completes.
        pub hang: bool,
        pub delay: Option<Duration>,
        pub handles: Mutex<HashMap<String, Vec<Arc<MockHandle>>>>,
    }

    impl MockConnector {
        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        /// Most recent handle opened for a tenant.
        pub fn last_handle(&self, tenant: &str) -> Arc<MockHandle> {
            self.handles.lock().unwrap()[tenant].last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            tenant: &TenantDescriptor,
            _pool: &PoolSettings,
        ) -> Result<Arc<dyn DatabaseHandle>, TenantError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.unreachable.lock().unwrap().contains(&tenant.tenant_id) {
                return Err(TenantError::Unavailable {
                    tenant: tenant.tenant_id.clone(),
                    reason: "connection refused".into(),
                });
            }
            let (events, _) = broadcast::channel(16);
            let handle = Arc::new(MockHandle {
                tenant: tenant.tenant_id.clone(),
                state: Mutex::new(ReadyState::Connected),
                events,
                registrations: Mutex::new(Vec::new()),
                fail_close: self.fail_close.lock().unwrap().contains(&tenant.tenant_id),
                already_registered: self.already_registered,
                closes: self.closes.clone(),
            });
            self.handles
                .lock()
                .unwrap()
                .entry(tenant.tenant_id.clone())
                .or_default()
                .push(handle.clone());
            Ok(handle)
        }
    }
}
