//! Declarative description of the desired database state.
//!
//! A manifest lists the application users, collections (with their
//! `$jsonSchema` validators) and secondary indexes a database should end up
//! with. It is plain JSON on disk and is fully validated before the engine
//! issues a single database call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{BootstrapError, Result};

/// Full desired state for one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Default target database. A caller-supplied name takes precedence.
    pub database: Option<String>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

/// An application user to provision, with its role grants.
///
/// Passwords never appear in a manifest; `password_env` names the
/// environment variable that carries the value at deploy time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    pub password_env: String,
    pub roles: Vec<RoleGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub db: String,
}

/// A collection and the validator its documents must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Fields every document must carry.
    #[serde(default)]
    pub required: Vec<String>,
    /// Per-field type and pattern constraints.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConstraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConstraint {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub pattern: Option<String>,
    pub description: Option<String>,
}

/// BSON type aliases a validator may reference. Anything else fails
/// deserialization and surfaces as an invalid manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    ObjectId,
    Date,
    Int,
    Long,
    Double,
    Decimal,
    Bool,
    Array,
    Object,
    Timestamp,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::ObjectId => "objectId",
            Self::Date => "date",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A secondary index on one collection. Key order is significant for
/// compound indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub collection: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
    /// Explicit index name; defaults to the `field_1_other_-1` convention.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Direction value as the wire protocol encodes it.
    pub fn bson_value(&self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

impl Manifest {
    /// Read and validate a manifest from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            BootstrapError::invalid(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_slice(&bytes)
    }

    /// Parse and validate a manifest from raw JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| BootstrapError::invalid(format!("parse manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Every check that can run without a database connection. Called by
    /// the loaders above; exposed for manifests built in code.
    pub fn validate(&self) -> Result<()> {
        let mut user_names = BTreeSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(BootstrapError::invalid("user with an empty name"));
            }
            if user.password_env.is_empty() {
                return Err(BootstrapError::invalid(format!(
                    "user '{}' has an empty password_env",
                    user.name
                )));
            }
            if !user_names.insert(&user.name) {
                return Err(BootstrapError::invalid(format!(
                    "user '{}' is declared twice",
                    user.name
                )));
            }
        }

        let mut collection_names = BTreeSet::new();
        for collection in &self.collections {
            collection.validate()?;
            if !collection_names.insert(&collection.name) {
                return Err(BootstrapError::invalid(format!(
                    "collection '{}' is declared twice",
                    collection.name
                )));
            }
        }

        let mut index_names = BTreeSet::new();
        for index in &self.indexes {
            index.validate()?;
            if !index_names.insert((&index.collection, index.index_name())) {
                return Err(BootstrapError::invalid(format!(
                    "index '{}' on '{}' is declared twice",
                    index.index_name(),
                    index.collection
                )));
            }
            // Legal: the collection may already exist in the target
            // database. Still worth flagging to the author.
            if !collection_names.contains(&index.collection) {
                tracing::warn!(
                    collection = %index.collection,
                    index = %index.index_name(),
                    "index targets a collection not declared in this manifest"
                );
            }
        }

        Ok(())
    }
}

impl CollectionSpec {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BootstrapError::invalid("collection with an empty name"));
        }
        let mut required = BTreeSet::new();
        for field in &self.required {
            if field.is_empty() {
                return Err(BootstrapError::invalid(format!(
                    "collection '{}' requires a field with an empty name",
                    self.name
                )));
            }
            if !required.insert(field) {
                return Err(BootstrapError::invalid(format!(
                    "collection '{}' lists required field '{}' twice",
                    self.name, field
                )));
            }
        }
        for (field, constraint) in &self.fields {
            if let Some(pattern) = &constraint.pattern {
                if constraint.field_type != FieldType::String {
                    return Err(BootstrapError::invalid(format!(
                        "field '{}.{}' has a pattern but type '{}'; patterns apply to strings",
                        self.name, field, constraint.field_type
                    )));
                }
                Regex::new(pattern).map_err(|e| {
                    BootstrapError::invalid(format!(
                        "field '{}.{}' has an invalid pattern: {}",
                        self.name, field, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Whether creating this collection needs a validator at all.
    pub fn has_validator(&self) -> bool {
        !self.required.is_empty() || !self.fields.is_empty()
    }

    /// The `$jsonSchema` body enforcing this spec.
    pub fn json_schema(&self) -> Value {
        let mut schema = serde_json::Map::new();
        schema.insert("bsonType".into(), json!("object"));
        if !self.required.is_empty() {
            schema.insert("required".into(), json!(self.required));
        }
        if !self.fields.is_empty() {
            let mut properties = serde_json::Map::new();
            for (field, constraint) in &self.fields {
                let mut prop = serde_json::Map::new();
                prop.insert("bsonType".into(), json!(constraint.field_type.as_str()));
                if let Some(pattern) = &constraint.pattern {
                    prop.insert("pattern".into(), json!(pattern));
                }
                if let Some(description) = &constraint.description {
                    prop.insert("description".into(), json!(description));
                }
                properties.insert(field.clone(), Value::Object(prop));
            }
            schema.insert("properties".into(), Value::Object(properties));
        }
        Value::Object(schema)
    }
}

impl IndexSpec {
    fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(BootstrapError::invalid("index with an empty collection name"));
        }
        if self.keys.is_empty() {
            return Err(BootstrapError::invalid(format!(
                "index on '{}' has no keys",
                self.collection
            )));
        }
        let mut fields = BTreeSet::new();
        for key in &self.keys {
            if key.field.is_empty() {
                return Err(BootstrapError::invalid(format!(
                    "index on '{}' has a key with an empty field name",
                    self.collection
                )));
            }
            if !fields.insert(&key.field) {
                return Err(BootstrapError::invalid(format!(
                    "index on '{}' lists field '{}' twice",
                    self.collection, key.field
                )));
            }
        }
        Ok(())
    }

    /// Explicit name, or the server's default naming convention.
    pub fn index_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|k| format!("{}_{}", k.field, k.order.bson_value()))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}
