//! `Catalog` implementation over a live MongoDB connection.
//!
//! The engine has already decided what to create before any method here
//! runs, so this layer only issues the administrative commands and maps
//! driver failures onto the bootstrap error taxonomy.

use async_trait::async_trait;
use mongodb::bson::{doc, to_bson, to_document, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};

use mongoboot_core::catalog::{Catalog, IndexState};
use mongoboot_core::error::{BootstrapError, Result};
use mongoboot_core::manifest::{CollectionSpec, IndexKey, IndexSpec, SortOrder, UserSpec};

// Server error codes that change how a failure is classified.
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

pub struct MongoCatalog {
    db: Database,
}

impl MongoCatalog {
    /// Connect and ping once, so a dead server fails the run up front
    /// instead of on the first create.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| connection("parse connection string", e))?;
        let client = Client::with_options(options).map_err(|e| connection("initialize client", e))?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connection("ping", e))?;
        Ok(Self { db })
    }
}

fn connection(operation: &'static str, source: mongodb::error::Error) -> BootstrapError {
    BootstrapError::Connection {
        operation,
        source: Box::new(source),
    }
}

fn command_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn key_document(keys: &[IndexKey]) -> Document {
    let mut document = Document::new();
    for key in keys {
        document.insert(&key.field, Bson::Int32(key.order.bson_value()));
    }
    document
}

/// Observed index, or `None` for special index types (text, geo) whose key
/// values are not plain directions; those never clash with manifest
/// indexes by definition.
fn index_state(model: &IndexModel) -> Option<IndexState> {
    let name = model.options.as_ref()?.name.clone()?;
    let mut keys = Vec::with_capacity(model.keys.len());
    for (field, value) in model.keys.iter() {
        let direction = match value {
            Bson::Int32(i) => i64::from(*i),
            Bson::Int64(i) => *i,
            Bson::Double(d) => *d as i64,
            _ => return None,
        };
        keys.push(IndexKey {
            field: field.clone(),
            order: if direction < 0 {
                SortOrder::Desc
            } else {
                SortOrder::Asc
            },
        });
    }
    let unique = model
        .options
        .as_ref()
        .and_then(|options| options.unique)
        .unwrap_or(false);
    Some(IndexState { name, keys, unique })
}

#[async_trait]
impl Catalog for MongoCatalog {
    async fn collection_names(&self) -> Result<Vec<String>> {
        self.db
            .list_collection_names()
            .await
            .map_err(|e| connection("list collections", e))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut action = self.db.create_collection(&spec.name);
        if spec.has_validator() {
            let schema = to_document(&spec.json_schema()).map_err(|e| {
                BootstrapError::InvalidSpec {
                    detail: format!("validator for '{}' does not encode: {}", spec.name, e),
                }
            })?;
            action = action.validator(doc! { "$jsonSchema": schema });
        }
        match action.await {
            Ok(()) => Ok(()),
            // Lost a race with a concurrent run; the collection is there.
            Err(err) if command_code(&err) == Some(NAMESPACE_EXISTS) => Ok(()),
            Err(err) => Err(connection("create collection", err)),
        }
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexState>> {
        let target = self.db.collection::<Document>(collection);
        let mut cursor = target
            .list_indexes()
            .await
            .map_err(|e| connection("list indexes", e))?;
        let mut states = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| connection("list indexes", e))?
        {
            let model = cursor
                .deserialize_current()
                .map_err(|e| connection("list indexes", e))?;
            if let Some(state) = index_state(&model) {
                states.push(state);
            }
        }
        Ok(states)
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        let options = IndexOptions::builder()
            .name(spec.index_name())
            .unique(spec.unique)
            .build();
        let model = IndexModel::builder()
            .keys(key_document(&spec.keys))
            .options(options)
            .build();
        match self.db.collection::<Document>(collection).create_index(model).await {
            Ok(_) => Ok(()),
            Err(err)
                if matches!(
                    command_code(&err),
                    Some(INDEX_OPTIONS_CONFLICT) | Some(INDEX_KEY_SPECS_CONFLICT)
                ) =>
            {
                Err(BootstrapError::IndexConflict {
                    collection: collection.to_string(),
                    index: spec.index_name(),
                    reason: "the server reports a conflicting index definition".into(),
                })
            }
            Err(err) => Err(connection("create index", err)),
        }
    }

    async fn user_exists(&self, name: &str) -> Result<bool> {
        let reply = self
            .db
            .run_command(doc! { "usersInfo": name })
            .await
            .map_err(|e| connection("usersInfo", e))?;
        Ok(reply
            .get_array("users")
            .map(|users| !users.is_empty())
            .unwrap_or(false))
    }

    async fn create_user(&self, spec: &UserSpec, password: &str) -> Result<()> {
        let roles = to_bson(&spec.roles).map_err(|e| BootstrapError::InvalidSpec {
            detail: format!("roles for user '{}' do not encode: {}", spec.name, e),
        })?;
        self.db
            .run_command(doc! {
                "createUser": &spec.name,
                "pwd": password,
                "roles": roles,
            })
            .await
            .map_err(|e| connection("createUser", e))?;
        Ok(())
    }
}
