//! Tenant config validation: required fields and unique ids.

use crate::config::{NewTenant, TenantConfig};
use crate::error::ConfigError;
use crate::tenant::normalize_tenant_id;
use std::collections::HashSet;

/// Checks one tenant definition. Returns the reason it is unusable.
pub fn validate_tenant(tenant_id: &str, tenant: &NewTenant) -> Result<(), String> {
    if tenant_id.trim().is_empty() {
        return Err("tenant id must not be blank".into());
    }
    if tenant.db_uri.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(format!("tenant '{}' requires dbUri", tenant_id.trim()));
    }
    Ok(())
}

pub fn validate_tenants(configs: &[TenantConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for c in configs {
        validate_tenant(&c.id, &c.tenant).map_err(ConfigError::Validation)?;
        let id = normalize_tenant_id(Some(&c.id));
        if !seen.insert(id.clone()) {
            return Err(ConfigError::Validation(format!("duplicate tenant id: {}", id)));
        }
    }
    Ok(())
}
