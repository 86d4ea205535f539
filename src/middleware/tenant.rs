//! Tenant identification: derive the tenant of each request, validate it, and attach a
//! [`TenantContext`] carrying a model accessor bound to that tenant.
//!
//! Resolution order, first match wins: `X-Tenant-ID` header, subdomain of the host,
//! `?tenant=`, body `tenantId` (JSON or form), a `T<tenant>_...` transaction id (`txn` or
//! `merchantTransactionId`, query before body), then the reserved default tenant.

use crate::error::{AppError, TenantError};
use crate::extractors::{ModelAccessor, TenantContext, TenantSource, TENANT_ID_HEADER};
use crate::state::AppState;
use crate::tenant::{normalize_tenant_id, DEFAULT_TENANT_ID};
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, request::Parts, Method},
    middleware::Next,
    response::Response,
};
use http_body_util::LengthLimitError;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::OnceLock;

const TENANT_QUERY_PARAM: &str = "tenant";
const TENANT_BODY_FIELD: &str = "tenantId";
const TRANSACTION_FIELDS: [&str; 2] = ["txn", "merchantTransactionId"];

/// Everything a request carries that can name a tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantSignals {
    pub header: Option<String>,
    pub host: Option<String>,
    pub query_tenant: Option<String>,
    pub query_transaction: Option<String>,
    pub body_tenant: Option<String>,
    pub body_transaction: Option<String>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl TenantSignals {
    /// Signals available without reading the body.
    pub fn from_parts(parts: &Parts) -> Self {
        // Undecodable bytes stay in the id so the registry rejects it.
        let header = parts
            .headers
            .get(TENANT_ID_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| parts.uri.host().map(String::from));
        let query: HashMap<String, String> = Query::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let query_transaction = TRANSACTION_FIELDS
            .iter()
            .find_map(|k| query.get(*k).filter(|v| !v.trim().is_empty()).cloned());
        TenantSignals {
            header,
            host,
            query_tenant: query.get(TENANT_QUERY_PARAM).cloned(),
            query_transaction,
            ..Default::default()
        }
    }

    /// True when nothing ahead of the body in the resolution order names a tenant.
    pub fn needs_body(&self) -> bool {
        non_blank(&self.header).is_none()
            && self.host.as_deref().and_then(subdomain).is_none()
            && non_blank(&self.query_tenant).is_none()
    }

    /// Record `tenantId` and transaction ids from a JSON object or form body. A body that
    /// does not parse is ignored.
    pub fn read_body(&mut self, format: BodyFormat, bytes: &[u8]) {
        let fields: HashMap<String, String> = match format {
            BodyFormat::Json => match serde_json::from_slice::<Value>(bytes) {
                Ok(Value::Object(body)) => body
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        Value::String(s) => Some((k, s)),
                        _ => None,
                    })
                    .collect(),
                _ => return,
            },
            BodyFormat::Form => match serde_urlencoded::from_bytes(bytes) {
                Ok(fields) => fields,
                Err(_) => return,
            },
        };
        let text = |key: &str| {
            fields
                .get(key)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        self.body_tenant = text(TENANT_BODY_FIELD);
        self.body_transaction = TRANSACTION_FIELDS.iter().find_map(|k| text(*k));
    }
}

/// Tenant label of a host with more than two labels; never for `localhost` or IP literals.
pub fn subdomain(host: &str) -> Option<String> {
    let host = host.trim();
    if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
        return None;
    }
    let hostname = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    if hostname.eq_ignore_ascii_case("localhost") || hostname.parse::<IpAddr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = hostname.split('.').collect();
    match labels.first() {
        Some(first) if labels.len() > 2 && !first.is_empty() => Some(first.to_string()),
        _ => None,
    }
}

fn transaction_prefix() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^T([^_]+)_").ok()).as_ref()
}

/// Tenant embedded in a payment transaction id: `Tacme_TXN123` -> `acme`.
pub fn tenant_from_transaction(id: &str) -> Option<String> {
    transaction_prefix()?
        .captures(id.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Apply the resolution order. The result is normalized; it is not validated.
pub fn resolve_tenant(signals: &TenantSignals) -> (String, TenantSource) {
    let found = non_blank(&signals.header)
        .map(|h| (h.to_string(), TenantSource::Header))
        .or_else(|| {
            signals
                .host
                .as_deref()
                .and_then(subdomain)
                .map(|s| (s, TenantSource::Subdomain))
        })
        .or_else(|| non_blank(&signals.query_tenant).map(|q| (q.to_string(), TenantSource::Query)))
        .or_else(|| non_blank(&signals.body_tenant).map(|b| (b.to_string(), TenantSource::Body)))
        .or_else(|| {
            non_blank(&signals.query_transaction)
                .or_else(|| non_blank(&signals.body_transaction))
                .and_then(tenant_from_transaction)
                .map(|t| (t, TenantSource::Transaction))
        });
    match found {
        Some((raw, source)) => (normalize_tenant_id(Some(&raw)), source),
        None => (DEFAULT_TENANT_ID.to_string(), TenantSource::Default),
    }
}

/// Body encodings the identification layer looks into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
}

fn body_format(parts: &Parts) -> Option<BodyFormat> {
    if !matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
        return None;
    }
    let ct = parts.headers.get(header::CONTENT_TYPE)?.to_str().ok()?.to_ascii_lowercase();
    if ct.starts_with("application/json") || ct.contains("+json") {
        Some(BodyFormat::Json)
    } else if ct.starts_with("application/x-www-form-urlencoded") {
        Some(BodyFormat::Form)
    } else {
        None
    }
}

fn exceeds_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

fn body_error(limit: usize, e: axum::Error) -> AppError {
    if exceeds_limit(&e) {
        AppError::PayloadTooLarge(format!("request body exceeds {} bytes", limit))
    } else {
        AppError::BadRequest(format!("reading request body: {}", e))
    }
}

/// Identification layer. Unknown or inactive tenants are rejected with 403 before any
/// database work; otherwise the request gets a [`TenantContext`].
pub async fn identify_tenant(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let mut signals = TenantSignals::from_parts(&parts);
    let body = match body_format(&parts).filter(|_| signals.needs_body()) {
        Some(format) => {
            let bytes = axum::body::to_bytes(body, state.body_limit)
                .await
                .map_err(|e| body_error(state.body_limit, e))?;
            signals.read_body(format, &bytes);
            Body::from(bytes)
        }
        None => body,
    };

    let (tenant_id, source) = resolve_tenant(&signals);
    match state.registry.lookup(Some(&tenant_id)) {
        Some(t) if t.is_active => {}
        Some(_) => return Err(TenantError::Inactive(tenant_id).into()),
        None => return Err(TenantError::Unknown(tenant_id).into()),
    }
    tracing::debug!(tenant = %tenant_id, source = ?source, "tenant identified");

    parts.extensions.insert(TenantContext {
        accessor: ModelAccessor::new(tenant_id.clone(), state.binder.clone()),
        tenant_id,
        source,
    });
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Guard for routes that must never fall back to the default tenant.
pub async fn require_tenant(request: Request, next: Next) -> Result<Response, AppError> {
    match request.extensions().get::<TenantContext>() {
        Some(ctx) if ctx.tenant_id != DEFAULT_TENANT_ID => Ok(next.run(request).await),
        _ => Err(TenantError::Required.into()),
    }
}
