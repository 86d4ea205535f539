//! Tenant database provisioning helpers.

use crate::error::TenantError;
use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use std::str::FromStr;

/// Ensure the database named in `database_url` exists; create it if not. Connects to the
/// `postgres` maintenance database on the same server to run CREATE DATABASE.
pub async fn ensure_database_exists(tenant_id: &str, database_url: &str) -> Result<(), TenantError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url).ok_or_else(|| TenantError::Misconfigured {
        tenant: tenant_id.to_string(),
        reason: "connection uri has no database path".into(),
    })?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let unavailable = |e: sqlx::Error| TenantError::Unavailable {
        tenant: tenant_id.to_string(),
        reason: e.to_string(),
    };
    let opts = PgConnectOptions::from_str(&admin_url).map_err(|e| TenantError::Misconfigured {
        tenant: tenant_id.to_string(),
        reason: format!("invalid connection uri: {}", e),
    })?;
    let mut conn = opts.connect().await.map_err(unavailable)?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .map_err(unavailable)?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await
            .map_err(unavailable)?;
        tracing::info!(tenant = %tenant_id, database = %db_name, "created tenant database");
    }
    Ok(())
}

/// Split a connection URL into (maintenance URL, database name).
fn parse_db_name_from_url(url: &str) -> Option<(String, String)> {
    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
    let path_start = scheme_end + url.get(scheme_end..)?.find('/')? + 1;
    let (base, path_and_query) = url.split_at(path_start);
    let (db_name, query) = match path_and_query.split_once('?') {
        Some((db, q)) => (db.trim(), Some(q)),
        None => (path_and_query.trim(), None),
    };
    let admin_url = match query {
        Some(q) => format!("{}postgres?{}", base, q),
        None => format!("{}postgres", base),
    };
    Some((admin_url, db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
