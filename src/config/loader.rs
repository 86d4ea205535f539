//! Load settings from the environment and tenant definitions from a JSON file.

use crate::config::types::*;
use crate::config::validate_tenants;
use crate::error::ConfigError;
use crate::tenant::{normalize_tenant_id, TenantRegistry, DEFAULT_TENANT_ID};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const FALLBACK_DEFAULT_URI: &str = "postgres://localhost/school_erp";

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl PoolSettings {
    pub fn from_env() -> Self {
        let d = PoolSettings::default();
        PoolSettings {
            min_connections: env_parse("TENANT_DB_MIN_CONNECTIONS", d.min_connections),
            max_connections: env_parse("TENANT_DB_MAX_CONNECTIONS", d.max_connections),
            idle_timeout: Duration::from_secs(env_parse("TENANT_DB_IDLE_TIMEOUT_SECS", d.idle_timeout.as_secs())),
            connect_timeout: Duration::from_secs(env_parse(
                "TENANT_DB_CONNECT_TIMEOUT_SECS",
                d.connect_timeout.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(env_parse(
                "TENANT_DB_HEARTBEAT_SECS",
                d.heartbeat_interval.as_secs(),
            )),
            create_missing_databases: env_parse("TENANT_DB_CREATE_MISSING", d.create_missing_databases),
        }
    }
}

impl Settings {
    /// Read settings from env. Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Self {
        let default_tenant_uri = ["DEFAULT_TENANT_DB", "LOCAL_DB_CONNECT", "DATABASE_URL"]
            .iter()
            .find_map(|k| env_non_empty(k))
            .unwrap_or_else(|| FALLBACK_DEFAULT_URI.into());
        Settings {
            bind_addr: env_non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:5000".into()),
            tenants_path: env_non_empty("TENANTS_PATH").map(PathBuf::from),
            default_tenant_uri,
            pool: PoolSettings::from_env(),
            body_limit: env_parse("BODY_LIMIT_BYTES", 1024 * 1024),
        }
    }
}

pub fn parse_tenants(json: &str) -> Result<Vec<TenantConfig>, ConfigError> {
    let configs: Vec<TenantConfig> = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    validate_tenants(&configs)?;
    Ok(configs)
}

pub async fn load_tenants_from_path(path: &Path) -> Result<Vec<TenantConfig>, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    parse_tenants(&raw)
}

/// Definition of the reserved default tenant built from settings.
pub fn default_tenant_config(settings: &Settings) -> TenantConfig {
    TenantConfig {
        id: DEFAULT_TENANT_ID.into(),
        tenant: NewTenant {
            name: Some("Default School".into()),
            db_uri: Some(settings.default_tenant_uri.clone()),
            is_active: Some(true),
            settings: Some(TenantSettings {
                max_students: 10_000,
                max_teachers: 1000,
                features: ["sba", "attendance", "fees", "store", "canteen", "banking"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        },
    }
}

/// Build the registry: default tenant from settings, then the tenants file (if any).
/// A `default` entry in the file replaces the one derived from settings.
pub async fn load_registry(settings: &Settings) -> Result<TenantRegistry, ConfigError> {
    let from_file = match &settings.tenants_path {
        Some(path) => load_tenants_from_path(path).await?,
        None => Vec::new(),
    };
    let file_has_default = from_file
        .iter()
        .any(|c| normalize_tenant_id(Some(&c.id)) == DEFAULT_TENANT_ID);
    let mut configs = Vec::with_capacity(from_file.len() + 1);
    if !file_has_default {
        configs.push(default_tenant_config(settings));
    }
    configs.extend(from_file);
    let registry = TenantRegistry::from_configs(configs)?;
    tracing::info!(tenants = registry.len(), "tenant registry loaded");
    Ok(registry)
}
