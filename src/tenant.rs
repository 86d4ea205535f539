//! Multi-tenant registry: one descriptor (connection URI, active flag, limits) per school.

use crate::config::{validate_tenant, validate_tenants, NewTenant, TenantConfig, TenantSettings};
use crate::error::{AppError, ConfigError, RegisterError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Reserved tenant used when a request carries no tenant signal.
pub const DEFAULT_TENANT_ID: &str = "default";

/// Trim and lowercase a tenant id; absent or blank resolves to [`DEFAULT_TENANT_ID`].
pub fn normalize_tenant_id(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_lowercase(),
        None => DEFAULT_TENANT_ID.to_string(),
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDescriptor {
    pub tenant_id: String,
    pub display_name: String,
    /// Never exposed over HTTP; it usually carries credentials.
    #[serde(skip_serializing)]
    pub connection_uri: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub settings: TenantSettings,
}

impl TenantDescriptor {
    fn from_new(tenant_id: String, tenant: NewTenant) -> Self {
        TenantDescriptor {
            display_name: tenant.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| tenant_id.clone()),
            connection_uri: tenant.db_uri.unwrap_or_default().trim().to_string(),
            is_active: tenant.is_active.unwrap_or(true),
            created_at: Utc::now(),
            settings: tenant.settings.unwrap_or_default(),
            tenant_id,
        }
    }
}

/// In-memory tenant registry. Shared via `Arc`; the admin surface mutates it at runtime.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    by_id: RwLock<HashMap<String, TenantDescriptor>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        TenantRegistry::default()
    }

    /// Build from validated config entries.
    pub fn from_configs(configs: Vec<TenantConfig>) -> Result<Self, ConfigError> {
        validate_tenants(&configs)?;
        let by_id = configs
            .into_iter()
            .map(|c| {
                let id = normalize_tenant_id(Some(&c.id));
                (id.clone(), TenantDescriptor::from_new(id, c.tenant))
            })
            .collect();
        Ok(TenantRegistry {
            by_id: RwLock::new(by_id),
        })
    }

    /// Case-insensitive lookup; absent or blank id resolves to the default tenant.
    pub fn lookup(&self, tenant_id: Option<&str>) -> Option<TenantDescriptor> {
        let id = normalize_tenant_id(tenant_id);
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn is_active(&self, tenant_id: &str) -> bool {
        self.lookup(Some(tenant_id)).map(|t| t.is_active).unwrap_or(false)
    }

    /// Add a tenant. Never touches any database.
    pub fn register(&self, tenant_id: &str, tenant: NewTenant) -> Result<TenantDescriptor, RegisterError> {
        validate_tenant(tenant_id, &tenant).map_err(RegisterError::Invalid)?;
        let id = normalize_tenant_id(Some(tenant_id));
        let mut by_id = self.by_id.write().unwrap_or_else(PoisonError::into_inner);
        if by_id.contains_key(&id) {
            return Err(RegisterError::AlreadyExists(id));
        }
        let descriptor = TenantDescriptor::from_new(id.clone(), tenant);
        by_id.insert(id.clone(), descriptor.clone());
        tracing::info!(tenant = %id, "tenant registered");
        Ok(descriptor)
    }

    /// Mark a tenant inactive. Descriptors are never deleted.
    pub fn deactivate(&self, tenant_id: &str) -> Result<TenantDescriptor, AppError> {
        let id = normalize_tenant_id(Some(tenant_id));
        let mut by_id = self.by_id.write().unwrap_or_else(PoisonError::into_inner);
        let entry = by_id
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("tenant '{}'", id)))?;
        entry.is_active = false;
        tracing::info!(tenant = %id, "tenant deactivated");
        Ok(entry.clone())
    }

    /// Active tenants ordered by id.
    pub fn list_active(&self) -> Vec<TenantDescriptor> {
        let mut active: Vec<_> = self
            .by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        active
    }

    pub fn len(&self) -> usize {
        self.by_id.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tenant(uri: &str) -> NewTenant {
        NewTenant {
            db_uri: Some(uri.into()),
            ..Default::default()
        }
    }

    fn registry() -> TenantRegistry {
        let r = TenantRegistry::new();
        r.register(DEFAULT_TENANT_ID, new_tenant("postgres://h/default")).unwrap();
        r.register("Main-School", new_tenant("postgres://h/main")).unwrap();
        r
    }

    #[test]
    fn normalize_defaults_blank_and_lowercases() {
        assert_eq!(normalize_tenant_id(None), "default");
        assert_eq!(normalize_tenant_id(Some("   ")), "default");
        assert_eq!(normalize_tenant_id(Some(" ACME ")), "acme");
    }

    #[test]
    fn lookup_is_case_insensitive_and_blank_means_default() {
        let r = registry();
        assert_eq!(r.lookup(Some("MAIN-SCHOOL")).unwrap().tenant_id, "main-school");
        assert_eq!(r.lookup(Some("")).unwrap().tenant_id, DEFAULT_TENANT_ID);
        assert!(r.lookup(Some("nope")).is_none());
    }

    #[test]
    fn register_reports_duplicates_and_invalid_configs() {
        let r = registry();
        assert_eq!(
            r.register("main-school", new_tenant("postgres://h/x")).unwrap_err(),
            RegisterError::AlreadyExists("main-school".into())
        );
        assert!(matches!(
            r.register("other", NewTenant::default()).unwrap_err(),
            RegisterError::Invalid(_)
        ));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn register_fills_defaults() {
        let r = registry();
        let t = r.register("acme", new_tenant("postgres://h/acme")).unwrap();
        assert_eq!(t.display_name, "acme");
        assert!(t.is_active);
        assert_eq!(t.settings, TenantSettings::default());
    }

    #[test]
    fn deactivate_keeps_descriptor_but_hides_it_from_active_list() {
        let r = registry();
        r.deactivate("main-school").unwrap();
        assert!(!r.is_active("main-school"));
        assert!(r.lookup(Some("main-school")).is_some());
        let active: Vec<_> = r.list_active().into_iter().map(|t| t.tenant_id).collect();
        assert_eq!(active, vec!["default".to_string()]);
        assert!(matches!(r.deactivate("ghost"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn serialized_descriptor_omits_connection_uri() {
        let t = registry().lookup(Some("main-school")).unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert!(json.get("connectionUri").is_none());
        assert_eq!(json["tenantId"], "main-school");
    }
}
