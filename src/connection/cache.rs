//! Connection cache: at most one live connection per tenant, created lazily.
//!
//! A miss installs a pending slot before any I/O, so concurrent misses for the same tenant
//! wait on a single attempt and share its outcome. Established connections are watched by a
//! lifecycle task that evicts them on error or disconnect; the next caller reconnects.

use super::{ConnectionEvent, Connector, ReadyState, TenantConnection};
use crate::config::PoolSettings;
use crate::error::TenantError;
use crate::schema::ModelName;
use crate::tenant::{normalize_tenant_id, TenantDescriptor, TenantRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

type Outcome = Option<Result<Arc<TenantConnection>, TenantError>>;

enum Slot {
    Ready(Arc<TenantConnection>),
    /// An attempt is in flight; waiters subscribe to its outcome.
    Pending {
        generation: u64,
        rx: watch::Receiver<Outcome>,
    },
}

enum Step {
    Hit(Arc<TenantConnection>),
    Wait(watch::Receiver<Outcome>),
    Create {
        descriptor: TenantDescriptor,
        generation: u64,
        tx: watch::Sender<Outcome>,
    },
}

struct CacheInner {
    registry: Arc<TenantRegistry>,
    connector: Arc<dyn Connector>,
    pool: PoolSettings,
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

/// Observability snapshot of one cached tenant connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub ready_state: ReadyState,
    pub host: Option<String>,
    pub name: Option<String>,
    pub models: Vec<ModelName>,
}

/// Owned per-process cache of tenant connections. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct ConnectionCache {
    inner: Arc<CacheInner>,
}

impl CacheInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide under the lock whether to reuse, wait, or open a new connection.
    fn begin(&self, tenant_id: &str) -> Result<Step, TenantError> {
        let mut slots = self.slots();
        let stale = match slots.get(tenant_id) {
            Some(Slot::Ready(conn)) if conn.ready_state() == ReadyState::Connected => {
                tracing::debug!(tenant = %tenant_id, "connection cache hit");
                return Ok(Step::Hit(conn.clone()));
            }
            Some(Slot::Pending { rx, .. }) => return Ok(Step::Wait(rx.clone())),
            Some(Slot::Ready(_)) => true,
            None => false,
        };
        if stale {
            if let Some(Slot::Ready(conn)) = slots.remove(tenant_id) {
                tracing::warn!(
                    tenant = %tenant_id,
                    state = ?conn.ready_state(),
                    "evicting cached connection that is not connected"
                );
                close_in_background(conn);
            }
        }

        let descriptor = self
            .registry
            .lookup(Some(tenant_id))
            .ok_or_else(|| TenantError::Misconfigured {
                tenant: tenant_id.to_string(),
                reason: "no tenant descriptor".into(),
            })?;
        if !descriptor.is_active {
            return Err(TenantError::Inactive(tenant_id.to_string()));
        }
        if descriptor.connection_uri.trim().is_empty() {
            return Err(TenantError::Misconfigured {
                tenant: tenant_id.to_string(),
                reason: "missing connection uri".into(),
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        slots.insert(tenant_id.to_string(), Slot::Pending { generation, rx });
        Ok(Step::Create {
            descriptor,
            generation,
            tx,
        })
    }

    /// Remove the pending slot for `generation`, if it is still the current one.
    fn clear_pending(&self, tenant_id: &str, generation: u64) {
        let mut slots = self.slots();
        if matches!(slots.get(tenant_id), Some(Slot::Pending { generation: g, .. }) if *g == generation) {
            slots.remove(tenant_id);
        }
    }

    /// Replace our pending slot with the established connection. False if the slot was
    /// closed or replaced while the attempt was in flight.
    fn install(&self, conn: &Arc<TenantConnection>) -> bool {
        let mut slots = self.slots();
        match slots.get(conn.tenant_id()) {
            Some(Slot::Pending { generation, .. }) if *generation == conn.generation() => {
                slots.insert(conn.tenant_id().to_string(), Slot::Ready(conn.clone()));
                true
            }
            _ => false,
        }
    }

    /// Evict the connection of `generation`; a newer connection for the tenant is left alone.
    fn evict(&self, tenant_id: &str, generation: u64) -> Option<Arc<TenantConnection>> {
        let mut slots = self.slots();
        match slots.get(tenant_id) {
            Some(Slot::Ready(conn)) if conn.generation() == generation => match slots.remove(tenant_id) {
                Some(Slot::Ready(conn)) => Some(conn),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Removes an abandoned pending slot when the creating future is dropped mid-attempt.
struct PendingGuard<'a> {
    inner: &'a CacheInner,
    tenant_id: &'a str,
    generation: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.clear_pending(self.tenant_id, self.generation);
        }
    }
}

fn close_in_background(conn: Arc<TenantConnection>) {
    tokio::spawn(async move {
        if let Err(e) = conn.handle().close().await {
            tracing::warn!(tenant = %conn.tenant_id(), error = %e, "closing evicted connection failed");
        }
    });
}

/// Watches one connection's events and evicts it on error or disconnect.
fn spawn_observer(
    inner: Weak<CacheInner>,
    conn: &TenantConnection,
    mut events: broadcast::Receiver<ConnectionEvent>,
) {
    let tenant_id = conn.tenant_id().to_string();
    let generation = conn.generation();
    tokio::spawn(async move {
        loop {
            let reason = match events.recv().await {
                Ok(ConnectionEvent::Error(e)) => {
                    tracing::warn!(tenant = %tenant_id, error = %e, "tenant connection error");
                    "error"
                }
                Ok(ConnectionEvent::Disconnected) => {
                    tracing::warn!(tenant = %tenant_id, "tenant database disconnected");
                    "disconnected"
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };
            let Some(inner) = inner.upgrade() else { return };
            if let Some(evicted) = inner.evict(&tenant_id, generation) {
                tracing::info!(tenant = %tenant_id, reason, "evicted tenant connection");
                close_in_background(evicted);
            }
            return;
        }
    });
}

impl ConnectionCache {
    pub fn new(registry: Arc<TenantRegistry>, connector: Arc<dyn Connector>, pool: PoolSettings) -> Self {
        ConnectionCache {
            inner: Arc::new(CacheInner {
                registry,
                connector,
                pool,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.inner.registry
    }

    pub fn pool_settings(&self) -> &PoolSettings {
        &self.inner.pool
    }

    /// Live connection for a tenant; blank id means the default tenant.
    ///
    /// Hits return immediately. A cached entry that is not connected is evicted first.
    /// Establishment failures (including the connect timeout) surface as
    /// [`TenantError::Unavailable`] and are never cached.
    pub async fn get_connection(&self, tenant_id: &str) -> Result<Arc<TenantConnection>, TenantError> {
        let tenant_id = normalize_tenant_id(Some(tenant_id));
        let mut retried = false;
        loop {
            match self.inner.begin(&tenant_id)? {
                Step::Hit(conn) => return Ok(conn),
                Step::Wait(mut rx) => {
                    let shared = rx.wait_for(Option::is_some).await.ok().and_then(|v| v.clone());
                    match shared {
                        Some(outcome) => return outcome,
                        // The creating request went away; start over once.
                        None if !retried => retried = true,
                        None => {
                            return Err(TenantError::Unavailable {
                                tenant: tenant_id,
                                reason: "connection attempt abandoned".into(),
                            })
                        }
                    }
                }
                Step::Create {
                    descriptor,
                    generation,
                    tx,
                } => return self.create(&tenant_id, descriptor, generation, tx).await,
            }
        }
    }

    async fn create(
        &self,
        tenant_id: &str,
        descriptor: TenantDescriptor,
        generation: u64,
        tx: watch::Sender<Outcome>,
    ) -> Result<Arc<TenantConnection>, TenantError> {
        let mut guard = PendingGuard {
            inner: &self.inner,
            tenant_id,
            generation,
            armed: true,
        };
        let timeout = self.inner.pool.connect_timeout;
        let attempt = self.inner.connector.connect(&descriptor, &self.inner.pool);
        let opened = match tokio::time::timeout(timeout, attempt).await {
            Ok(opened) => opened,
            Err(_) => Err(TenantError::Unavailable {
                tenant: tenant_id.to_string(),
                reason: format!("connect timed out after {}ms", timeout.as_millis()),
            }),
        };

        let result = match opened {
            Ok(handle) => {
                let events = handle.subscribe();
                let conn = Arc::new(TenantConnection::new(tenant_id.to_string(), generation, handle));
                if self.inner.install(&conn) {
                    spawn_observer(Arc::downgrade(&self.inner), &conn, events);
                    tracing::info!(
                        tenant = %tenant_id,
                        host = conn.handle().host().as_deref().unwrap_or("-"),
                        database = conn.handle().name().as_deref().unwrap_or("-"),
                        "tenant connection established"
                    );
                    Ok(conn)
                } else {
                    tracing::warn!(tenant = %tenant_id, "connection closed while it was being opened");
                    close_in_background(conn);
                    Err(TenantError::Unavailable {
                        tenant: tenant_id.to_string(),
                        reason: "connection closed while it was being opened".into(),
                    })
                }
            }
            Err(e) => {
                self.inner.clear_pending(tenant_id, generation);
                tracing::warn!(tenant = %tenant_id, error = %e, "tenant connection failed");
                Err(e)
            }
        };
        guard.armed = false;
        let _ = tx.send(Some(result.clone()));
        result
    }

    /// Close and evict one tenant's connection. Returns false if none was cached.
    pub async fn close_one(&self, tenant_id: &str) -> bool {
        let tenant_id = normalize_tenant_id(Some(tenant_id));
        let removed = self.inner.slots().remove(&tenant_id);
        match removed {
            Some(Slot::Ready(conn)) => {
                if let Err(e) = conn.handle().close().await {
                    tracing::error!(tenant = %tenant_id, error = %e, "closing tenant connection failed");
                }
                tracing::info!(tenant = %tenant_id, "tenant connection closed");
                true
            }
            Some(Slot::Pending { .. }) => {
                tracing::info!(tenant = %tenant_id, "pending tenant connection cancelled");
                true
            }
            None => false,
        }
    }

    /// Close every cached connection concurrently, then leave the cache empty. A failure
    /// closing one tenant is logged and does not stop the rest. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, Slot)> = self.inner.slots().drain().collect();
        let mut closing = JoinSet::new();
        for (tenant_id, slot) in drained {
            if let Slot::Ready(conn) = slot {
                closing.spawn(async move {
                    let result = conn.handle().close().await;
                    (tenant_id, result)
                });
            }
        }
        let mut closed = 0;
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((_, Ok(()))) => closed += 1,
                Ok((tenant_id, Err(e))) => {
                    tracing::error!(tenant = %tenant_id, error = %e, "closing tenant connection failed")
                }
                Err(e) => tracing::error!(error = %e, "close task failed"),
            }
        }
        tracing::info!(closed, "all tenant connections closed");
        closed
    }

    /// Tenant id -> connection snapshot. In-flight attempts report `connecting`.
    pub fn status(&self) -> BTreeMap<String, ConnectionStatus> {
        self.inner
            .slots()
            .iter()
            .map(|(tenant_id, slot)| {
                let status = match slot {
                    Slot::Ready(conn) => ConnectionStatus {
                        ready_state: conn.ready_state(),
                        host: conn.handle().host(),
                        name: conn.handle().name(),
                        models: conn.registered_models(),
                    },
                    Slot::Pending { .. } => ConnectionStatus {
                        ready_state: ReadyState::Connecting,
                        host: None,
                        name: None,
                        models: Vec::new(),
                    },
                };
                (tenant_id.clone(), status)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
