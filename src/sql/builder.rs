//! Builds parameterized SELECT, INSERT, UPDATE, DELETE over document tables.
//!
//! Every statement returns rows as a single JSONB document: the `data` column merged with
//! `_id`, the reference fields, `createdAt` and `updatedAt`.

use super::BindValue;
use crate::schema::{ModelSchema, Reference};
use serde_json::Value;
use uuid::Uuid;

const MAIN_ALIAS: &str = "main";

/// Rows per list request when the caller does not say.
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Quote identifier for PostgreSQL (safe: only from the catalog).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// A reference field to inline as the referenced document.
#[derive(Clone, Copy, Debug)]
pub struct Populate<'a> {
    pub reference: &'a Reference,
    pub target: &'a ModelSchema,
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<BindValue>,
}

impl QueryBuf {
    fn push_param(&mut self, v: BindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// JSONB document expression for the row aliased `alias`. Populated references become
/// scalar subqueries yielding the referenced document (or null).
fn document_expr(schema: &ModelSchema, alias: &str, populate: &[Populate<'_>]) -> String {
    let mut pairs = vec![format!("'_id', {}.{}", alias, quoted("id"))];
    for reference in schema.references {
        let value = match populate.iter().find(|p| p.reference.column == reference.column) {
            Some(p) => {
                let sub = format!("p_{}", reference.column);
                format!(
                    "(SELECT {} FROM {} {} WHERE {}.{} = {}.{})",
                    document_expr(p.target, &sub, &[]),
                    quoted(p.target.collection()),
                    sub,
                    sub,
                    quoted("id"),
                    alias,
                    quoted(reference.column)
                )
            }
            None => format!("{}.{}", alias, quoted(reference.column)),
        };
        pairs.push(format!("'{}', {}", reference.field, value));
    }
    pairs.push(format!("'createdAt', {}.{}", alias, quoted("created_at")));
    pairs.push(format!("'updatedAt', {}.{}", alias, quoted("updated_at")));
    format!("({}.{} || jsonb_build_object({}))", alias, quoted("data"), pairs.join(", "))
}

fn main_table(schema: &ModelSchema) -> String {
    format!("{} {}", quoted(schema.collection()), MAIN_ALIAS)
}

/// SELECT one document by id.
pub fn select_by_id(schema: &ModelSchema, id: Uuid, populate: &[Populate<'_>]) -> QueryBuf {
    let mut q = QueryBuf::default();
    let n = q.push_param(BindValue::Uuid(id));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {}.{} = ${}",
        document_expr(schema, MAIN_ALIAS, populate),
        main_table(schema),
        MAIN_ALIAS,
        quoted("id"),
        n
    );
    q
}

/// SELECT documents with equality filters on reference columns (`None` matches NULL),
/// oldest first, with LIMIT (capped at [`MAX_LIMIT`]) and OFFSET.
pub fn select_list(
    schema: &ModelSchema,
    filters: &[(&Reference, Option<Uuid>)],
    populate: &[Populate<'_>],
    limit: Option<u32>,
    offset: Option<u32>,
) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut where_parts = Vec::new();
    for (reference, value) in filters {
        let column = format!("{}.{}", MAIN_ALIAS, quoted(reference.column));
        match value {
            Some(id) => {
                let n = q.push_param(BindValue::Uuid(*id));
                where_parts.push(format!("{} = ${}", column, n));
            }
            None => where_parts.push(format!("{} IS NULL", column)),
        }
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = offset.unwrap_or(0);
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}.{}, {}.{} LIMIT {} OFFSET {}",
        document_expr(schema, MAIN_ALIAS, populate),
        main_table(schema),
        where_clause,
        MAIN_ALIAS,
        quoted("created_at"),
        MAIN_ALIAS,
        quoted("id"),
        limit,
        offset
    );
    q
}

/// INSERT one document: reference columns plus the remaining fields as `data`.
pub fn insert(schema: &ModelSchema, references: &[(&Reference, Option<Uuid>)], data: Value) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (reference, value) in references {
        let n = q.push_param(BindValue::OptionalUuid(*value));
        cols.push(quoted(reference.column));
        placeholders.push(format!("${}", n));
    }
    let n = q.push_param(BindValue::Json(data));
    cols.push(quoted("data"));
    placeholders.push(format!("${}", n));
    q.sql = format!(
        "INSERT INTO {} AS {} ({}) VALUES ({}) RETURNING {}",
        quoted(schema.collection()),
        MAIN_ALIAS,
        cols.join(", "),
        placeholders.join(", "),
        document_expr(schema, MAIN_ALIAS, &[])
    );
    q
}

/// UPDATE by id: sets the given reference columns and merges `data` into the stored fields.
pub fn update(
    schema: &ModelSchema,
    id: Uuid,
    references: &[(&Reference, Option<Uuid>)],
    data: Value,
) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut sets = Vec::new();
    for (reference, value) in references {
        let n = q.push_param(BindValue::OptionalUuid(*value));
        sets.push(format!("{} = ${}", quoted(reference.column), n));
    }
    let n = q.push_param(BindValue::Json(data));
    sets.push(format!("{} = {}.{} || ${}", quoted("data"), MAIN_ALIAS, quoted("data"), n));
    sets.push(format!("{} = NOW()", quoted("updated_at")));
    let id_param = q.push_param(BindValue::Uuid(id));
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {}.{} = ${} RETURNING {}",
        quoted(schema.collection()),
        MAIN_ALIAS,
        sets.join(", "),
        MAIN_ALIAS,
        quoted("id"),
        id_param,
        document_expr(schema, MAIN_ALIAS, &[])
    );
    q
}

/// DELETE by id, returning the removed document.
pub fn delete(schema: &ModelSchema, id: Uuid) -> QueryBuf {
    let mut q = QueryBuf::default();
    let n = q.push_param(BindValue::Uuid(id));
    q.sql = format!(
        "DELETE FROM {} AS {} WHERE {}.{} = ${} RETURNING {}",
        quoted(schema.collection()),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted("id"),
        n,
        document_expr(schema, MAIN_ALIAS, &[])
    );
    q
}
