//! End-to-end routing tests over the full router with an in-memory connector.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{self, StatusCode},
    Router,
};
use school_tenancy::{
    router, AppState, ConnectionEvent, Connector, DatabaseHandle, ModelSchema, NewTenant, PoolSettings, ReadyState,
    SchemaError, TenantDescriptor, TenantError, TenantRegistry,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tower::ServiceExt;

struct MemoryHandle {
    database: String,
    state: Mutex<ReadyState>,
    events: broadcast::Sender<ConnectionEvent>,
    schemas: AtomicUsize,
}

#[async_trait]
impl DatabaseHandle for MemoryHandle {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    fn host(&self) -> Option<String> {
        Some("memory".into())
    }

    fn name(&self) -> Option<String> {
        Some(self.database.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn register_schema(&self, _schema: &ModelSchema) -> Result<(), SchemaError> {
        self.schemas.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), String> {
        *self.state.lock().unwrap() = ReadyState::Disconnected;
        let _ = self.events.send(ConnectionEvent::Disconnected);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryConnector {
    connects: AtomicUsize,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        tenant: &TenantDescriptor,
        _pool: &PoolSettings,
    ) -> Result<Arc<dyn DatabaseHandle>, TenantError> {
        if tenant.connection_uri.contains("unreachable") {
            return Err(TenantError::Unavailable {
                tenant: tenant.tenant_id.clone(),
                reason: "connection refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(8);
        Ok(Arc::new(MemoryHandle {
            database: format!("erp_{}", tenant.tenant_id),
            state: Mutex::new(ReadyState::Connected),
            events,
            schemas: AtomicUsize::new(0),
        }))
    }
}

fn tenant(uri: &str, active: bool) -> NewTenant {
    NewTenant {
        name: None,
        db_uri: Some(uri.into()),
        is_active: Some(active),
        settings: None,
    }
}

fn app_with(registry: TenantRegistry) -> (Router, AppState, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::default());
    let state = AppState::new(
        Arc::new(registry),
        connector.clone(),
        PoolSettings::default(),
        64 * 1024,
    );
    (router(state.clone()), state, connector)
}

fn app() -> (Router, AppState, Arc<MemoryConnector>) {
    let registry = TenantRegistry::new();
    registry.register("default", tenant("postgres://h/school_erp", true)).unwrap();
    registry.register("acme", tenant("postgres://h/acme", true)).unwrap();
    registry.register("closed", tenant("postgres://h/closed", false)).unwrap();
    app_with(registry)
}

async fn send(app: &Router, request: http::Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> http::Request<Body> {
    http::Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_as(uri: &str, tenant_id: &str) -> http::Request<Body> {
    http::Request::builder()
        .uri(uri)
        .header("X-Tenant-ID", tenant_id)
        .body(Body::empty())
        .unwrap()
}

fn delete(uri: &str) -> http::Request<Body> {
    http::Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> http::Request<Body> {
    http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_and_version_need_no_tenant() {
    let (app, _, connector) = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "school-tenancy");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ready_reports_default_tenant_reachability() {
    let (app, _, _) = app();
    let (status, body) = send(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");

    let registry = TenantRegistry::new();
    registry.register("default", tenant("postgres://unreachable/erp", true)).unwrap();
    let (down, _, _) = app_with(registry);
    let (status, body) = send(&down, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert!(body["reason"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn admin_lists_only_active_tenants_without_uris() {
    let (app, _, _) = app();
    let (status, body) = send(&app, get("/admin/tenants")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 2);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["tenantId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["acme", "default"]);
    assert!(body["data"][0].get("connectionUri").is_none());
}

#[tokio::test]
async fn admin_registers_tenants_and_rejects_duplicates() {
    let (app, state, _) = app();
    let (status, body) = send(
        &app,
        post_json("/admin/tenants", json!({ "id": "Beta-School", "dbUri": "postgres://h/beta" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["tenantId"], "beta-school");
    assert!(state.registry.is_active("beta-school"));

    let (status, body) = send(
        &app,
        post_json("/admin/tenants", json!({ "id": "beta-school", "dbUri": "postgres://h/other" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = send(&app, post_json("/admin/tenants", json!({ "id": "gamma" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn deactivated_tenant_is_refused() {
    let (app, _, connector) = app();
    let (status, _) = send(&app, get_as("/api/tenant", "acme")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, post_json("/admin/tenants/acme/deactivate", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], false);

    let (status, body) = send(&app, get_as("/api/tenant", "acme")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "tenant_forbidden");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

    let (status, _) = send(&app, post_json("/admin/tenants/ghost/deactivate", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_and_inactive_tenants_are_forbidden() {
    let (app, _, connector) = app();
    for id in ["closed", "ghost"] {
        let (status, body) = send(&app, get_as("/api/students", id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "tenant {}", id);
        assert_eq!(body["error"]["details"]["tenant"], id);
    }
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_catalog_is_listed() {
    let (app, _, _) = app();
    let (status, body) = send(&app, get("/api/models")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 30);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names[0], "campus");
    assert!(names.contains(&"students"));
}

#[tokio::test]
async fn model_outside_catalog_is_not_found() {
    let (app, _, connector) = app();
    let (status, body) = send(&app, get_as("/api/dragons", "acme")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tenant_info_requires_an_explicit_tenant() {
    let (app, _, _) = app();
    let (status, body) = send(&app, get("/api/tenant")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "tenant_required");

    let (status, body) = send(&app, get_as("/api/tenant", "ACME")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tenant"]["tenantId"], "acme");
    assert_eq!(body["data"]["source"], "header");
    assert!(body["data"]["connection"].is_null());

    let (status, body) = send(&app, get("/api/tenant?tenant=acme")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["source"], "query");
}

#[tokio::test]
async fn reconnect_opens_a_fresh_connection_with_every_model() {
    let (app, state, connector) = app();
    state.cache.get_connection("acme").await.unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    let request = http::Request::builder()
        .method("POST")
        .uri("/api/tenant/reconnect")
        .header("X-Tenant-ID", "acme")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["closed"], true);
    assert_eq!(body["data"]["connection"]["readyState"], "connected");
    assert_eq!(body["data"]["connection"]["models"].as_array().unwrap().len(), 30);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connections_are_listed_and_closed() {
    let (app, state, _) = app();
    state.cache.get_connection("acme").await.unwrap();

    let (status, body) = send(&app, get("/admin/connections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["acme"]["name"], "erp_acme");
    assert_eq!(body["data"]["acme"]["host"], "memory");

    let (status, _) = send(&app, delete("/admin/connections/acme")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.cache.is_empty());

    let (status, _) = send(&app, delete("/admin/connections/acme")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
