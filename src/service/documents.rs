//! Document CRUD against a bound tenant model.

use super::validation::RequestValidator;
use crate::binder::Model;
use crate::error::AppError;
use crate::schema::SchemaRegistry;
use crate::sql::{bind_params, delete, insert, select_by_id, select_list, update, Populate, QueryBuf};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;

/// Query keys with meaning of their own; everything else is a candidate filter.
const LIST_KEYS: &[&str] = &["limit", "offset", "populate"];

pub struct DocumentService;

impl DocumentService {
    /// List documents. Query: `limit` (default 100, max 1000), `offset`, `populate`, and
    /// equality filters on reference fields.
    pub async fn list(
        model: &Model,
        schemas: &SchemaRegistry,
        params: &HashMap<String, String>,
    ) -> Result<Vec<Value>, AppError> {
        let schema = model.schema();
        let limit = params.get("limit").and_then(|v| v.parse().ok());
        let offset = params.get("offset").and_then(|v| v.parse().ok());
        let filter_params: HashMap<String, String> = params
            .iter()
            .filter(|(k, _)| !LIST_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let filters = RequestValidator::filters(schema, &filter_params)?;
        let populate = Self::populate(schemas, model, params.get("populate").map(String::as_str))?;
        let q = select_list(schema, &filters, &populate, limit, offset);
        Self::query_many(model.pool()?, &q).await
    }

    pub async fn read(
        model: &Model,
        schemas: &SchemaRegistry,
        id: &str,
        populate: Option<&str>,
    ) -> Result<Value, AppError> {
        let id = RequestValidator::id(id)?;
        let populate = Self::populate(schemas, model, populate)?;
        let q = select_by_id(model.schema(), id, &populate);
        Self::query_one(model.pool()?, &q)
            .await?
            .ok_or_else(|| Self::not_found(model, id))
    }

    pub async fn create(model: &Model, body: Value) -> Result<Value, AppError> {
        let doc = RequestValidator::document(model.schema(), body)?;
        let q = insert(model.schema(), &doc.references, doc.data);
        Self::query_one(model.pool()?, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    /// Set the given reference fields and merge the remaining fields into the document.
    pub async fn update(model: &Model, id: &str, body: Value) -> Result<Value, AppError> {
        let id = RequestValidator::id(id)?;
        let doc = RequestValidator::document(model.schema(), body)?;
        let q = update(model.schema(), id, &doc.references, doc.data);
        Self::query_one(model.pool()?, &q)
            .await?
            .ok_or_else(|| Self::not_found(model, id))
    }

    pub async fn delete(model: &Model, id: &str) -> Result<Value, AppError> {
        let id = RequestValidator::id(id)?;
        let q = delete(model.schema(), id);
        Self::query_one(model.pool()?, &q)
            .await?
            .ok_or_else(|| Self::not_found(model, id))
    }

    fn populate<'a>(
        schemas: &'a SchemaRegistry,
        model: &Model,
        raw: Option<&str>,
    ) -> Result<Vec<Populate<'a>>, AppError> {
        RequestValidator::populate(model.schema(), raw)?
            .into_iter()
            .map(|reference| {
                let target = schemas
                    .get(reference.target)
                    .ok_or_else(|| AppError::UnknownModel(reference.target.to_string()))?;
                Ok(Populate { reference, target })
            })
            .collect()
    }

    fn not_found(model: &Model, id: uuid::Uuid) -> AppError {
        AppError::NotFound(format!("{} '{}'", model.collection(), id))
    }

    async fn query_many(pool: &PgPool, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        let rows = bind_params(sqlx::query_scalar(&q.sql), &q.params)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    async fn query_one(pool: &PgPool, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        let row = bind_params(sqlx::query_scalar(&q.sql), &q.params)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }
}
