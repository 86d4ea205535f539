//! Schema registry: the fixed catalog of tenant-scoped collections.
//!
//! Every collection is a PostgreSQL table holding JSON documents plus one UUID column per
//! reference field, so that referenced documents can be joined (populated) on the same
//! tenant connection. Definitions are static and independent of any connection.

use crate::error::AppError;
use crate::sql::quoted;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Logical model names known to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelName {
    Students,
    Teachers,
    School,
    Classes,
    Courses,
    Attendance,
    Fees,
    Transactions,
    Campus,
    Scholarships,
    Sba,
    NotificationMessages,
    Notices,
    Deductions,
    Banking,
    StoreItems,
    StoreSales,
    NonTeachers,
    Prefects,
    ActivityLogs,
    Files,
    Chats,
    Ssnit,
    Payroll,
    SchoolProfiles,
    Homeworks,
    LeaveApplications,
    Quizzes,
    Badges,
    Images,
}

impl ModelName {
    pub const ALL: [ModelName; 30] = [
        ModelName::Students,
        ModelName::Teachers,
        ModelName::School,
        ModelName::Classes,
        ModelName::Courses,
        ModelName::Attendance,
        ModelName::Fees,
        ModelName::Transactions,
        ModelName::Campus,
        ModelName::Scholarships,
        ModelName::Sba,
        ModelName::NotificationMessages,
        ModelName::Notices,
        ModelName::Deductions,
        ModelName::Banking,
        ModelName::StoreItems,
        ModelName::StoreSales,
        ModelName::NonTeachers,
        ModelName::Prefects,
        ModelName::ActivityLogs,
        ModelName::Files,
        ModelName::Chats,
        ModelName::Ssnit,
        ModelName::Payroll,
        ModelName::SchoolProfiles,
        ModelName::Homeworks,
        ModelName::LeaveApplications,
        ModelName::Quizzes,
        ModelName::Badges,
        ModelName::Images,
    ];

    /// Name used by clients and as the table name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ModelName::Students => "students",
            ModelName::Teachers => "teachers",
            ModelName::School => "school",
            ModelName::Classes => "classes",
            ModelName::Courses => "courses",
            ModelName::Attendance => "attendance",
            ModelName::Fees => "fees",
            ModelName::Transactions => "transactions",
            ModelName::Campus => "campus",
            ModelName::Scholarships => "scholarships",
            ModelName::Sba => "sba",
            ModelName::NotificationMessages => "notificationmessages",
            ModelName::Notices => "notices",
            ModelName::Deductions => "deductions",
            ModelName::Banking => "banking",
            ModelName::StoreItems => "storeitems",
            ModelName::StoreSales => "storesales",
            ModelName::NonTeachers => "nonteachers",
            ModelName::Prefects => "prefects",
            ModelName::ActivityLogs => "activitylogs",
            ModelName::Files => "files",
            ModelName::Chats => "chats",
            ModelName::Ssnit => "ssnit",
            ModelName::Payroll => "payroll",
            ModelName::SchoolProfiles => "schoolprofiles",
            ModelName::Homeworks => "homeworks",
            ModelName::LeaveApplications => "leaveapplications",
            ModelName::Quizzes => "quizzes",
            ModelName::Badges => "badges",
            ModelName::Images => "images",
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ModelName::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AppError::UnknownModel(wanted.to_string()))
    }
}

impl Serialize for ModelName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A field holding the id of a document in another collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// Key as clients send it (e.g. `campusID`).
    pub field: &'static str,
    /// Storage column (e.g. `campus_id`).
    pub column: &'static str,
    pub target: ModelName,
}

const fn r(field: &'static str, column: &'static str, target: ModelName) -> Reference {
    Reference { field, column, target }
}

const CAMPUS: Reference = r("campusID", "campus_id", ModelName::Campus);
const CLASS: Reference = r("classID", "class_id", ModelName::Classes);
const COURSE: Reference = r("courseID", "course_id", ModelName::Courses);
const TEACHER: Reference = r("teacherID", "teacher_id", ModelName::Teachers);
const STUDENT: Reference = r("studentID", "student_id", ModelName::Students);
const TRANSACTION: Reference = r("transactionID", "transaction_id", ModelName::Transactions);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModelSchema {
    pub name: ModelName,
    pub references: &'static [Reference],
}

impl ModelSchema {
    pub const fn new(name: ModelName, references: &'static [Reference]) -> Self {
        ModelSchema { name, references }
    }

    pub fn collection(&self) -> &'static str {
        self.name.as_str()
    }

    pub fn reference(&self, field: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.field == field)
    }

    /// Idempotent DDL that materializes this collection on a tenant database.
    pub fn ddl(&self) -> Vec<String> {
        let table = quoted(self.collection());
        let mut col_defs = vec![format!("{} UUID PRIMARY KEY DEFAULT gen_random_uuid()", quoted("id"))];
        for reference in self.references {
            col_defs.push(format!("{} UUID", quoted(reference.column)));
        }
        col_defs.push(format!("{} JSONB NOT NULL DEFAULT '{{}}'::jsonb", quoted("data")));
        col_defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted("created_at")));
        col_defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted("updated_at")));

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            table,
            col_defs.join(",\n  ")
        )];
        for reference in self.references {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quoted(&format!("{}_{}_idx", self.collection(), reference.column)),
                table,
                quoted(reference.column)
            ));
        }
        statements
    }
}

/// Every tenant-scoped collection, in registration order.
pub static CATALOG: &[ModelSchema] = &[
    ModelSchema::new(ModelName::Campus, &[]),
    ModelSchema::new(
        ModelName::Students,
        &[CLASS, CAMPUS, r("scholarship", "scholarship_id", ModelName::Scholarships)],
    ),
    ModelSchema::new(ModelName::Teachers, &[CAMPUS]),
    ModelSchema::new(ModelName::School, &[CAMPUS]),
    ModelSchema::new(
        ModelName::Classes,
        &[TEACHER, CAMPUS, r("prefect", "prefect_id", ModelName::Students)],
    ),
    ModelSchema::new(ModelName::Courses, &[CLASS, TEACHER]),
    ModelSchema::new(ModelName::Attendance, &[CLASS, CAMPUS]),
    ModelSchema::new(ModelName::Fees, &[CAMPUS]),
    ModelSchema::new(
        ModelName::Transactions,
        &[
            CAMPUS,
            STUDENT,
            TEACHER,
            r("scholarshipID", "scholarship_id", ModelName::Scholarships),
            r("inventorySaleID", "inventory_sale_id", ModelName::StoreSales),
            r("bankAccountID", "bank_account_id", ModelName::Banking),
        ],
    ),
    ModelSchema::new(ModelName::Scholarships, &[CAMPUS]),
    ModelSchema::new(ModelName::Sba, &[STUDENT, CLASS, COURSE, CAMPUS]),
    ModelSchema::new(
        ModelName::NotificationMessages,
        &[
            r("noticeID", "notice_id", ModelName::Notices),
            r("homeworkID", "homework_id", ModelName::Homeworks),
            r("deductionID", "deduction_id", ModelName::Deductions),
            r("leaveApplicationID", "leave_application_id", ModelName::LeaveApplications),
        ],
    ),
    ModelSchema::new(
        ModelName::Notices,
        &[r("createdBy", "created_by", ModelName::Teachers), CAMPUS],
    ),
    ModelSchema::new(ModelName::Deductions, &[CAMPUS, TRANSACTION]),
    ModelSchema::new(ModelName::Banking, &[CAMPUS]),
    ModelSchema::new(ModelName::StoreItems, &[CAMPUS]),
    ModelSchema::new(
        ModelName::StoreSales,
        &[
            r("itemID", "item_id", ModelName::StoreItems),
            r("soldBy", "sold_by", ModelName::Teachers),
            CAMPUS,
            TRANSACTION,
        ],
    ),
    ModelSchema::new(ModelName::NonTeachers, &[CAMPUS]),
    ModelSchema::new(ModelName::Prefects, &[CAMPUS]),
    ModelSchema::new(ModelName::ActivityLogs, &[CAMPUS]),
    ModelSchema::new(
        ModelName::Files,
        &[COURSE, CLASS, r("senderID", "sender_id", ModelName::Teachers), CAMPUS],
    ),
    ModelSchema::new(ModelName::Chats, &[]),
    ModelSchema::new(ModelName::Ssnit, &[]),
    ModelSchema::new(ModelName::Payroll, &[CAMPUS]),
    ModelSchema::new(ModelName::SchoolProfiles, &[CAMPUS]),
    ModelSchema::new(ModelName::Homeworks, &[CLASS, COURSE, TEACHER, CAMPUS]),
    ModelSchema::new(
        ModelName::LeaveApplications,
        &[r("reviewedBy", "reviewed_by", ModelName::Teachers), CAMPUS],
    ),
    ModelSchema::new(ModelName::Quizzes, &[COURSE, CLASS, CAMPUS]),
    ModelSchema::new(ModelName::Badges, &[]),
    ModelSchema::new(ModelName::Images, &[]),
];

/// Immutable name -> schema mapping, built once at startup.
#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    ordered: Vec<ModelSchema>,
    by_name: HashMap<ModelName, usize>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        SchemaRegistry::standard()
    }
}

impl SchemaRegistry {
    /// The full catalog.
    pub fn standard() -> Self {
        SchemaRegistry::from_schemas(CATALOG.to_vec())
    }

    /// Registry over an explicit schema list; a repeated name keeps its first definition.
    pub fn from_schemas(schemas: Vec<ModelSchema>) -> Self {
        let mut ordered = Vec::with_capacity(schemas.len());
        let mut by_name = HashMap::with_capacity(schemas.len());
        for schema in schemas {
            if !by_name.contains_key(&schema.name) {
                by_name.insert(schema.name, ordered.len());
                ordered.push(schema);
            }
        }
        SchemaRegistry { ordered, by_name }
    }

    /// Case-insensitive lookup by model name.
    pub fn resolve(&self, model_name: &str) -> Result<&ModelSchema, AppError> {
        let name: ModelName = model_name.parse()?;
        self.get(name)
            .ok_or_else(|| AppError::UnknownModel(model_name.trim().to_string()))
    }

    pub fn get(&self, name: ModelName) -> Option<&ModelSchema> {
        self.by_name.get(&name).map(|&i| &self.ordered[i])
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.resolve(model_name).is_ok()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.ordered.iter().map(|s| s.collection()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSchema> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_covers_every_model_once() {
        let registry = SchemaRegistry::standard();
        assert_eq!(registry.len(), ModelName::ALL.len());
        assert_eq!(CATALOG.len(), ModelName::ALL.len());
        for name in ModelName::ALL {
            assert!(registry.get(name).is_some(), "{} missing from catalog", name);
        }
    }

    #[test]
    fn every_reference_targets_a_cataloged_model_with_unique_columns() {
        let registry = SchemaRegistry::standard();
        for schema in registry.iter() {
            let mut columns = HashSet::new();
            for reference in schema.references {
                assert!(registry.get(reference.target).is_some());
                assert!(columns.insert(reference.column), "{} repeats {}", schema.name, reference.column);
            }
        }
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = SchemaRegistry::standard();
        assert_eq!(registry.resolve("Students").unwrap().name, ModelName::Students);
        assert_eq!(registry.resolve(" LEAVEAPPLICATIONS ").unwrap().name, ModelName::LeaveApplications);
        assert!(registry.contains("quizzes"));
    }

    #[test]
    fn unknown_model_is_an_explicit_error() {
        let registry = SchemaRegistry::standard();
        match registry.resolve("canteen") {
            Err(AppError::UnknownModel(name)) => assert_eq!(name, "canteen"),
            other => panic!("expected UnknownModel, got {:?}", other.map(|s| s.name)),
        }
    }

    #[test]
    fn subset_registry_rejects_models_it_does_not_hold() {
        let registry = SchemaRegistry::from_schemas(vec![CATALOG[0], CATALOG[0]]);
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.resolve("students"), Err(AppError::UnknownModel(_))));
    }

    #[test]
    fn ddl_is_idempotent_and_has_reference_columns() {
        let classes = SchemaRegistry::standard().get(ModelName::Classes).copied().unwrap();
        let ddl = classes.ddl();
        assert_eq!(ddl.len(), 1 + classes.references.len());
        assert!(ddl[0].starts_with("CREATE TABLE IF NOT EXISTS \"classes\""));
        assert!(ddl[0].contains("\"teacher_id\" UUID"));
        assert!(ddl[0].contains("\"prefect_id\" UUID"));
        assert!(ddl[0].contains("'{}'::jsonb"));
        assert!(ddl
            .iter()
            .skip(1)
            .all(|s| s.starts_with("CREATE INDEX IF NOT EXISTS")));
        assert_eq!(classes.reference("campusID").unwrap().target, ModelName::Campus);
    }

    #[test]
    fn model_names_serialize_as_collection_names() {
        let json = serde_json::to_value(ModelName::NotificationMessages).unwrap();
        assert_eq!(json, "notificationmessages");
    }
}
