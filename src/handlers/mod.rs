//! HTTP handlers for tenant-scoped documents and tenant administration.

pub mod admin;
pub mod documents;
