//! Typed query parameters and binding.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryScalar;
use uuid::Uuid;

/// A value bound to a document query.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Uuid(Uuid),
    OptionalUuid(Option<Uuid>),
    Json(Value),
}

/// Bind `params` in order to a query returning one JSONB document per row.
pub fn bind_params<'q>(
    mut query: QueryScalar<'q, Postgres, Value, PgArguments>,
    params: &[BindValue],
) -> QueryScalar<'q, Postgres, Value, PgArguments> {
    for param in params {
        query = match param {
            BindValue::Uuid(id) => query.bind(*id),
            BindValue::OptionalUuid(id) => query.bind(*id),
            BindValue::Json(v) => query.bind(v.clone()),
        };
    }
    query
}
