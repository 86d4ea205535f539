//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures of tenant resolution and tenant connections. `Clone` so a single failed
/// connection attempt can be delivered to every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenantError {
    #[error("invalid or inactive tenant: {0}")]
    Unknown(String),
    #[error("invalid or inactive tenant: {0}")]
    Inactive(String),
    #[error("tenant '{tenant}' is misconfigured: {reason}")]
    Misconfigured { tenant: String, reason: String },
    #[error("tenant '{tenant}' is unavailable: {reason}")]
    Unavailable { tenant: String, reason: String },
    #[error("tenant identification required")]
    Required,
}

impl TenantError {
    /// Tenant id the error is about, if any.
    pub fn tenant(&self) -> Option<&str> {
        match self {
            TenantError::Unknown(t) | TenantError::Inactive(t) => Some(t),
            TenantError::Misconfigured { tenant, .. } | TenantError::Unavailable { tenant, .. } => Some(tenant),
            TenantError::Required => None,
        }
    }
}

/// Outcome of a rejected `TenantRegistry::register`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("tenant '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid tenant configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    /// Another session registered the same schema concurrently; callers treat this as success.
    #[error("schema '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("registering schema '{model}': {source}")]
    Db {
        model: String,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("model schema not found for: {0}")]
    UnknownModel(String),
    #[error("tenant context not found on request; the tenant identification layer must run first")]
    MissingTenantContext,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Tenant(e) => match e {
                TenantError::Unknown(_) | TenantError::Inactive(_) => (StatusCode::FORBIDDEN, "tenant_forbidden"),
                TenantError::Misconfigured { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "tenant_misconfigured"),
                TenantError::Unavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "tenant_unavailable"),
                TenantError::Required => (StatusCode::BAD_REQUEST, "tenant_required"),
            },
            AppError::Register(RegisterError::AlreadyExists(_)) => (StatusCode::CONFLICT, "conflict"),
            AppError::Register(RegisterError::Invalid(_)) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Schema(_) => (StatusCode::INTERNAL_SERVER_ERROR, "schema_error"),
            AppError::UnknownModel(_) => (StatusCode::INTERNAL_SERVER_ERROR, "unknown_model"),
            AppError::MissingTenantContext => (StatusCode::INTERNAL_SERVER_ERROR, "tenant_context_missing"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Tenant(e) => e.tenant().map(|t| serde_json::json!({ "tenant": t })),
            AppError::UnknownModel(m) => Some(serde_json::json!({ "model": m })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_tenant_maps_to_forbidden_with_tenant_detail() {
        let err = AppError::from(TenantError::Inactive("acme".into()));
        assert_eq!(err.status_and_code(), (StatusCode::FORBIDDEN, "tenant_forbidden"));
        assert_eq!(err.details(), Some(serde_json::json!({ "tenant": "acme" })));
        assert!(err.to_string().contains("acme"));
    }

    #[test]
    fn unavailable_and_misconfigured_are_distinguishable() {
        let down = AppError::from(TenantError::Unavailable {
            tenant: "a".into(),
            reason: "timeout".into(),
        });
        let bad = AppError::from(TenantError::Misconfigured {
            tenant: "a".into(),
            reason: "missing connection uri".into(),
        });
        assert_eq!(down.status_and_code().0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(bad.status_and_code().1, "tenant_misconfigured");
    }

    #[test]
    fn register_errors_map_to_conflict_and_validation() {
        assert_eq!(
            AppError::from(RegisterError::AlreadyExists("x".into())).status_and_code().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(RegisterError::Invalid("no uri".into())).status_and_code().0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
