//! The administrative-client seam the engine drives.
//!
//! The real backend lives in the `mongoboot` binary crate; `MemoryCatalog`
//! here backs the test-suite and enforces validators and unique indexes on
//! inserted documents so bootstrap outcomes can be observed end to end.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::Result;
use crate::manifest::{CollectionSpec, FieldType, IndexKey, IndexSpec, RoleGrant, UserSpec};

/// An index as observed on a live collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexState {
    pub name: String,
    pub keys: Vec<IndexKey>,
    pub unique: bool,
}

/// Administrative operations the engine needs from a database.
///
/// Implementations stay dumb: existence checks and conflict decisions are
/// the engine's job.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn collection_names(&self) -> Result<Vec<String>>;
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;
    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexState>>;
    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()>;
    async fn user_exists(&self, name: &str) -> Result<bool>;
    async fn create_user(&self, spec: &UserSpec, password: &str) -> Result<()>;
}

/// A document refused by a validator or a unique index.
#[derive(Debug, Error)]
#[error("document rejected: {reason}")]
pub struct DocumentRejection {
    reason: String,
}

impl DocumentRejection {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct MemoryCollection {
    validator: Option<CollectionSpec>,
    indexes: Vec<IndexState>,
    documents: Vec<Value>,
}

#[derive(Debug, Default, Serialize)]
struct MemoryState {
    users: BTreeMap<String, Vec<RoleGrant>>,
    collections: BTreeMap<String, MemoryCollection>,
}

/// In-memory catalog mirroring the server-side creation semantics:
/// creating an existing collection is a no-op, creating an index on a
/// missing collection brings the collection into being.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-populate a plain collection, as if an earlier deployment made it.
    pub fn seed_collection(&self, name: &str) {
        self.state().collections.entry(name.to_string()).or_default();
    }

    /// Pre-populate an index on a collection.
    pub fn seed_index(&self, collection: &str, index: IndexState) {
        self.state()
            .collections
            .entry(collection.to_string())
            .or_default()
            .indexes
            .push(index);
    }

    /// Serialized view of everything the catalog holds; two applications of
    /// the same manifest must leave this unchanged.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(&*self.state()).expect("in-memory state serializes")
    }

    /// Insert a document, enforcing the collection's validator and any
    /// unique indexes the same way the server would.
    pub fn insert_document(
        &self,
        collection: &str,
        document: Value,
    ) -> std::result::Result<(), DocumentRejection> {
        let mut state = self.state();
        let coll = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| DocumentRejection::new(format!("no collection '{}'", collection)))?;

        if let Some(spec) = &coll.validator {
            check_document(spec, &document)?;
        }
        for index in coll.indexes.iter().filter(|i| i.unique) {
            let key = key_values(index, &document);
            if coll.documents.iter().any(|d| key_values(index, d) == key) {
                return Err(DocumentRejection::new(format!(
                    "duplicate key for unique index '{}'",
                    index.name
                )));
            }
        }
        coll.documents.push(document);
        Ok(())
    }
}

fn key_values(index: &IndexState, document: &Value) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|k| document.get(&k.field).cloned().unwrap_or(Value::Null))
        .collect()
}

fn check_document(
    spec: &CollectionSpec,
    document: &Value,
) -> std::result::Result<(), DocumentRejection> {
    let object = document
        .as_object()
        .ok_or_else(|| DocumentRejection::new("document is not an object"))?;
    for field in &spec.required {
        if !object.contains_key(field) {
            return Err(DocumentRejection::new(format!(
                "missing required field '{}'",
                field
            )));
        }
    }
    for (field, constraint) in &spec.fields {
        let Some(value) = object.get(field) else {
            continue;
        };
        if !type_matches(constraint.field_type, value) {
            return Err(DocumentRejection::new(format!(
                "field '{}' is not of type '{}'",
                field, constraint.field_type
            )));
        }
        if let Some(pattern) = &constraint.pattern {
            let regex = Regex::new(pattern)
                .map_err(|_| DocumentRejection::new(format!("unusable pattern on '{}'", field)))?;
            let text = value.as_str().unwrap_or_default();
            if !regex.is_match(text) {
                return Err(DocumentRejection::new(format!(
                    "field '{}' does not match its pattern",
                    field
                )));
            }
        }
    }
    Ok(())
}

// JSON stand-ins for the BSON types an in-memory document can carry.
fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::ObjectId => value
            .as_str()
            .is_some_and(|s| s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())),
        FieldType::Date => value.is_string() || value.get("$date").is_some(),
        FieldType::Int | FieldType::Long => value.is_i64() || value.is_u64(),
        FieldType::Double => value.is_number(),
        FieldType::Decimal => value.is_number() || value.is_string(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Timestamp => value.is_number() || value.is_object(),
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.state().collections.keys().cloned().collect())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut state = self.state();
        // Same outcome as the server's NamespaceExists: first writer wins.
        state
            .collections
            .entry(spec.name.clone())
            .or_insert_with(|| MemoryCollection {
                validator: spec.has_validator().then(|| spec.clone()),
                ..MemoryCollection::default()
            });
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexState>> {
        Ok(self
            .state()
            .collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        self.state()
            .collections
            .entry(collection.to_string())
            .or_default()
            .indexes
            .push(IndexState {
                name: spec.index_name(),
                keys: spec.keys.clone(),
                unique: spec.unique,
            });
        Ok(())
    }

    async fn user_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().users.contains_key(name))
    }

    async fn create_user(&self, spec: &UserSpec, _password: &str) -> Result<()> {
        self.state()
            .users
            .entry(spec.name.clone())
            .or_insert_with(|| spec.roles.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::manifest::{FieldConstraint, SortOrder};

    fn courses_spec() -> CollectionSpec {
        let mut fields = BTreeMap::new();
        fields.insert(
            "title".to_string(),
            FieldConstraint {
                field_type: FieldType::String,
                pattern: None,
                description: None,
            },
        );
        fields.insert(
            "created_at".to_string(),
            FieldConstraint {
                field_type: FieldType::Date,
                pattern: None,
                description: None,
            },
        );
        CollectionSpec {
            name: "courses".into(),
            required: vec!["title".into(), "description".into(), "created_at".into()],
            fields,
        }
    }

    #[tokio::test]
    async fn validator_rejects_missing_required_fields() {
        let catalog = MemoryCatalog::default();
        catalog.create_collection(&courses_spec()).await.unwrap();

        let err = catalog
            .insert_document("courses", json!({ "title": "A" }))
            .unwrap_err();
        assert!(err.to_string().contains("description"));

        catalog
            .insert_document(
                "courses",
                json!({
                    "title": "A",
                    "description": "B",
                    "created_at": "2024-01-01T00:00:00Z"
                }),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn validator_rejects_wrong_types_and_patterns() {
        let catalog = MemoryCatalog::default();
        let mut spec = courses_spec();
        spec.fields.insert(
            "code".to_string(),
            FieldConstraint {
                field_type: FieldType::String,
                pattern: Some("^[A-Z]{3}-[0-9]+$".into()),
                description: None,
            },
        );
        catalog.create_collection(&spec).await.unwrap();

        let err = catalog
            .insert_document(
                "courses",
                json!({ "title": 7, "description": "B", "created_at": "2024-01-01" }),
            )
            .unwrap_err();
        assert!(err.to_string().contains("type 'string'"));

        let err = catalog
            .insert_document(
                "courses",
                json!({
                    "title": "A",
                    "description": "B",
                    "created_at": "2024-01-01",
                    "code": "abc"
                }),
            )
            .unwrap_err();
        assert!(err.to_string().contains("pattern"));
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let catalog = MemoryCatalog::default();
        catalog.seed_collection("users");
        catalog.seed_index(
            "users",
            IndexState {
                name: "email_1".into(),
                keys: vec![IndexKey {
                    field: "email".into(),
                    order: SortOrder::Asc,
                }],
                unique: true,
            },
        );

        catalog
            .insert_document("users", json!({ "email": "x@y.com" }))
            .unwrap();
        let err = catalog
            .insert_document("users", json!({ "email": "x@y.com" }))
            .unwrap_err();
        assert!(err.to_string().contains("email_1"));
        // A different value still goes through.
        catalog
            .insert_document("users", json!({ "email": "z@y.com" }))
            .unwrap();
    }

    #[tokio::test]
    async fn creating_an_existing_collection_leaves_it_alone() {
        let catalog = MemoryCatalog::default();
        catalog.seed_collection("lessons");
        let before = catalog.snapshot();

        catalog.create_collection(&courses_spec()).await.unwrap();
        let mut lessons_spec = courses_spec();
        lessons_spec.name = "lessons".into();
        catalog.create_collection(&lessons_spec).await.unwrap();

        let after = catalog.snapshot();
        assert_eq!(before["collections"]["lessons"], after["collections"]["lessons"]);
        assert!(after["collections"]["lessons"]["validator"].is_null());
    }
}
