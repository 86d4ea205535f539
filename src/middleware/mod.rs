pub mod tenant;

pub use tenant::{
    identify_tenant, require_tenant, resolve_tenant, subdomain, tenant_from_transaction, BodyFormat, TenantSignals,
};
