//! Request validation for document bodies and list queries.

use crate::error::AppError;
use crate::schema::{ModelSchema, Reference};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Keys computed from storage; ignored when clients send them.
const RESERVED_KEYS: &[&str] = &["_id", "createdAt", "updatedAt"];

/// A document body split into reference columns and the free-form `data` object.
#[derive(Debug)]
pub struct DocumentBody {
    pub references: Vec<(&'static Reference, Option<Uuid>)>,
    pub data: Value,
}

pub struct RequestValidator;

impl RequestValidator {
    /// Split a JSON object body. Reference fields must be UUID strings or null.
    pub fn document(schema: &ModelSchema, body: Value) -> Result<DocumentBody, AppError> {
        let mut fields = match body {
            Value::Object(m) => m,
            _ => return Err(AppError::BadRequest("body must be a JSON object".into())),
        };
        for key in RESERVED_KEYS {
            fields.remove(*key);
        }
        let mut references = Vec::new();
        for reference in schema.references {
            if let Some(v) = fields.remove(reference.field) {
                references.push((reference, reference_value(reference.field, &v)?));
            }
        }
        Ok(DocumentBody {
            references,
            data: Value::Object(fields),
        })
    }

    /// Equality filters on reference fields from query parameters; `null` matches unset.
    /// Parameters that are not reference fields are ignored.
    pub fn filters(
        schema: &ModelSchema,
        params: &HashMap<String, String>,
    ) -> Result<Vec<(&'static Reference, Option<Uuid>)>, AppError> {
        let mut filters = Vec::new();
        for reference in schema.references {
            if let Some(raw) = params.get(reference.field) {
                let value = if raw.eq_ignore_ascii_case("null") {
                    None
                } else {
                    Some(parse_uuid(reference.field, raw)?)
                };
                filters.push((reference, value));
            }
        }
        Ok(filters)
    }

    /// Reference fields named in a comma-separated `populate` parameter.
    pub fn populate(schema: &ModelSchema, raw: Option<&str>) -> Result<Vec<&'static Reference>, AppError> {
        let Some(raw) = raw else { return Ok(Vec::new()) };
        let mut fields: Vec<&'static Reference> = Vec::new();
        for field in raw.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let reference = schema
                .references
                .iter()
                .find(|r| r.field == field)
                .ok_or_else(|| {
                    AppError::BadRequest(format!("{} has no reference field '{}'", schema.collection(), field))
                })?;
            if !fields.iter().any(|r| r.column == reference.column) {
                fields.push(reference);
            }
        }
        Ok(fields)
    }

    pub fn id(raw: &str) -> Result<Uuid, AppError> {
        Uuid::parse_str(raw.trim()).map_err(|_| AppError::BadRequest("invalid id: expected a UUID".into()))
    }
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation(format!("{} must be a valid UUID", field)))
}

fn reference_value(field: &str, v: &Value) -> Result<Option<Uuid>, AppError> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_uuid(field, s).map(Some),
        _ => Err(AppError::Validation(format!("{} must be a valid UUID", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModelName, SchemaRegistry};
    use serde_json::json;

    fn schema(name: ModelName) -> ModelSchema {
        *SchemaRegistry::standard().get(name).unwrap()
    }

    #[test]
    fn document_splits_references_from_data() {
        let campus = Uuid::new_v4();
        let body = json!({
            "_id": "ignored",
            "name": "Ama",
            "campusID": campus.to_string(),
            "classID": null,
        });
        let doc = RequestValidator::document(&schema(ModelName::Students), body).unwrap();
        assert_eq!(doc.data, json!({"name": "Ama"}));
        let refs: Vec<_> = doc.references.iter().map(|(r, v)| (r.field, *v)).collect();
        assert_eq!(refs, vec![("classID", None), ("campusID", Some(campus))]);
    }

    #[test]
    fn document_rejects_bad_reference_and_non_object() {
        let students = schema(ModelName::Students);
        let err = RequestValidator::document(&students, json!({"campusID": 7})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(matches!(
            RequestValidator::document(&students, json!([1, 2])),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn filters_only_use_reference_fields() {
        let id = Uuid::new_v4();
        let params: HashMap<String, String> = [
            ("classID".to_string(), id.to_string()),
            ("campusID".to_string(), "null".to_string()),
            ("name".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        let filters = RequestValidator::filters(&schema(ModelName::Attendance), &params).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].1, Some(id));
        assert_eq!(filters[1].1, None);
    }

    #[test]
    fn populate_rejects_unknown_fields_and_dedupes() {
        let classes = schema(ModelName::Classes);
        let fields = RequestValidator::populate(&classes, Some("teacherID, campusID,teacherID")).unwrap();
        assert_eq!(fields.len(), 2);
        assert!(RequestValidator::populate(&classes, Some("studentID")).is_err());
        assert!(RequestValidator::populate(&classes, None).unwrap().is_empty());
    }
}
