//! Raw config types: tenant file entries (JSON) and process settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-tenant limits and enabled feature set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    #[serde(default = "default_max_students")]
    pub max_students: u32,
    #[serde(default = "default_max_teachers")]
    pub max_teachers: u32,
    #[serde(default = "default_features")]
    pub features: Vec<String>,
}

fn default_max_students() -> u32 {
    5000
}

fn default_max_teachers() -> u32 {
    500
}

fn default_features() -> Vec<String> {
    ["sba", "attendance", "fees"].iter().map(|s| s.to_string()).collect()
}

impl Default for TenantSettings {
    fn default() -> Self {
        TenantSettings {
            max_students: default_max_students(),
            max_teachers: default_max_teachers(),
            features: default_features(),
        }
    }
}

/// Body of an "add tenant" request; everything except the id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTenant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub db_uri: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub settings: Option<TenantSettings>,
}

/// One entry of the tenants file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    #[serde(flatten)]
    pub tenant: NewTenant,
}

/// Pool shape and timeouts for every tenant database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Idle sessions are closed after this long.
    pub idle_timeout: Duration,
    /// Upper bound for opening a tenant database; an unreachable server fails within it.
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Create the tenant database (CREATE DATABASE) when it does not exist yet.
    pub create_missing_databases: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            min_connections: 2,
            max_connections: 10,
            idle_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            create_missing_databases: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub bind_addr: String,
    pub tenants_path: Option<PathBuf>,
    /// Connection URI of the reserved `default` tenant.
    pub default_tenant_uri: String,
    pub pool: PoolSettings,
    pub body_limit: usize,
}
