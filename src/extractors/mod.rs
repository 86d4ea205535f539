pub mod tenant;

pub use tenant::{ModelAccessor, TenantContext, TenantSource, TENANT_ID_HEADER};
