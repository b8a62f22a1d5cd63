//! The bootstrap engine: one linear pass that converges a database on a
//! manifest. Users first, then collections, then indexes — indexes may
//! depend on collections existing. Nothing is ever dropped or rewritten;
//! whatever already matches is skipped, so rerunning a manifest is always
//! safe.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::catalog::{Catalog, IndexState};
use crate::error::{BootstrapError, Result};
use crate::manifest::Manifest;
use crate::secrets::Secrets;

/// What one apply run did, by object name (indexes as
/// `collection.index_name`).
#[derive(Debug, Default)]
pub struct Report {
    pub created_users: Vec<String>,
    pub skipped_users: Vec<String>,
    pub created_collections: Vec<String>,
    pub skipped_collections: Vec<String>,
    pub created_indexes: Vec<String>,
    pub skipped_indexes: Vec<String>,
}

impl Report {
    /// False when the run was a pure no-op, i.e. the database already
    /// matched the manifest.
    pub fn changed(&self) -> bool {
        !self.created_users.is_empty()
            || !self.created_collections.is_empty()
            || !self.created_indexes.is_empty()
    }
}

/// Apply `manifest` against `catalog`, creating whatever is missing and
/// leaving existing objects untouched.
///
/// On error nothing is rolled back: every step is independently idempotent
/// and the documented recovery is to rerun the whole manifest.
pub async fn apply(
    manifest: &Manifest,
    secrets: &Secrets,
    catalog: &dyn Catalog,
) -> Result<Report> {
    let mut report = Report::default();

    for user in &manifest.users {
        if catalog.user_exists(&user.name).await? {
            debug!(user = %user.name, "user exists, skipping");
            report.skipped_users.push(user.name.clone());
            continue;
        }
        let password = secrets.password_for(&user.name).ok_or_else(|| {
            BootstrapError::invalid(format!("no password resolved for user '{}'", user.name))
        })?;
        catalog.create_user(user, password).await?;
        info!(user = %user.name, "created user");
        report.created_users.push(user.name.clone());
    }

    let present: BTreeSet<String> = catalog.collection_names().await?.into_iter().collect();
    for collection in &manifest.collections {
        if present.contains(&collection.name) {
            debug!(collection = %collection.name, "collection exists, skipping");
            report.skipped_collections.push(collection.name.clone());
            continue;
        }
        catalog.create_collection(collection).await?;
        info!(collection = %collection.name, "created collection");
        report.created_collections.push(collection.name.clone());
    }

    // One listing per collection, kept current as indexes are created.
    let mut listed: BTreeMap<String, Vec<IndexState>> = BTreeMap::new();
    for spec in &manifest.indexes {
        let states = match listed.entry(spec.collection.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(catalog.list_indexes(&spec.collection).await?),
        };

        let name = spec.index_name();
        let label = format!("{}.{}", spec.collection, name);
        if let Some(state) = states.iter().find(|s| s.name == name) {
            if state.keys == spec.keys && state.unique == spec.unique {
                debug!(index = %label, "equivalent index exists, skipping");
                report.skipped_indexes.push(label);
            } else {
                return Err(BootstrapError::IndexConflict {
                    collection: spec.collection.clone(),
                    index: name,
                    reason: "an index with this name exists with a different definition".into(),
                });
            }
        } else if let Some(state) = states.iter().find(|s| s.keys == spec.keys) {
            if state.unique == spec.unique {
                debug!(index = %label, existing = %state.name, "key pattern already indexed, skipping");
                report.skipped_indexes.push(label);
            } else {
                return Err(BootstrapError::IndexConflict {
                    collection: spec.collection.clone(),
                    index: name,
                    reason: format!(
                        "key pattern already indexed by '{}' with different uniqueness",
                        state.name
                    ),
                });
            }
        } else {
            catalog.create_index(&spec.collection, spec).await?;
            states.push(IndexState {
                name,
                keys: spec.keys.clone(),
                unique: spec.unique,
            });
            info!(index = %label, unique = spec.unique, "created index");
            report.created_indexes.push(label);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::manifest::{IndexKey, SortOrder};

    fn lms_manifest() -> Manifest {
        let value = json!({
            "database": "lms_mongo_db",
            "users": [{
                "name": "lms_app_user",
                "password_env": "LMS_APP_PASSWORD",
                "roles": [{ "role": "readWrite", "db": "lms_mongo_db" }]
            }],
            "collections": [
                {
                    "name": "users",
                    "required": ["username", "email"],
                    "fields": {
                        "username": { "type": "string" },
                        "email": { "type": "string" }
                    }
                },
                {
                    "name": "courses",
                    "required": ["title", "description", "created_at"],
                    "fields": {
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "created_at": { "type": "date" }
                    }
                },
                { "name": "lessons" }
            ],
            "indexes": [
                { "collection": "users", "keys": [{ "field": "email" }], "unique": true },
                { "collection": "courses", "keys": [{ "field": "title" }] },
                { "collection": "courses", "keys": [{ "field": "created_at", "order": "desc" }] },
                { "collection": "lessons", "keys": [{ "field": "course_id" }] }
            ]
        });
        Manifest::from_slice(value.to_string().as_bytes()).unwrap()
    }

    fn secrets(manifest: &Manifest) -> Secrets {
        Secrets::resolve(manifest, |_| Some("hunter2".to_string())).unwrap()
    }

    #[tokio::test]
    async fn applies_a_manifest_to_an_empty_database() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        let report = apply(&manifest, &secrets(&manifest), &catalog).await.unwrap();

        assert_eq!(report.created_users, vec!["lms_app_user"]);
        assert_eq!(report.created_collections, vec!["users", "courses", "lessons"]);
        assert_eq!(report.created_indexes.len(), 4);
        assert!(report.skipped_collections.is_empty());
        assert!(report.changed());

        // The validator is live: the scenario from the courses collection.
        assert!(catalog.insert_document("courses", json!({ "title": "A" })).is_err());
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

        // And so is the unique email index.
        catalog
            .insert_document("users", json!({ "username": "a", "email": "x@y.com" }))
            .unwrap();
        assert!(catalog
            .insert_document("users", json!({ "username": "b", "email": "x@y.com" }))
            .is_err());
    }

    #[tokio::test]
    async fn applying_twice_is_a_no_op() {
        let manifest = lms_manifest();
        let secrets = secrets(&manifest);
        let catalog = MemoryCatalog::default();

        apply(&manifest, &secrets, &catalog).await.unwrap();
        let after_first = catalog.snapshot();

        let second = apply(&manifest, &secrets, &catalog).await.unwrap();
        assert!(!second.changed());
        assert_eq!(second.skipped_users, vec!["lms_app_user"]);
        assert_eq!(second.skipped_collections.len(), 3);
        assert_eq!(second.skipped_indexes.len(), 4);
        assert_eq!(catalog.snapshot(), after_first);
    }

    #[tokio::test]
    async fn existing_collections_are_left_untouched() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        catalog.seed_collection("lessons");
        catalog.seed_collection("courses");

        let report = apply(&manifest, &secrets(&manifest), &catalog).await.unwrap();
        assert_eq!(report.created_collections, vec!["users"]);
        assert_eq!(report.skipped_collections, vec!["courses", "lessons"]);

        // The pre-existing courses collection never got a validator, so a
        // bare document still goes in.
        catalog.insert_document("courses", json!({ "title": "A" })).unwrap();
    }

    #[tokio::test]
    async fn same_name_different_definition_is_a_conflict() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        catalog.seed_index(
            "users",
            IndexState {
                name: "email_1".into(),
                keys: vec![IndexKey {
                    field: "email".into(),
                    order: SortOrder::Desc,
                }],
                unique: false,
            },
        );

        let err = apply(&manifest, &secrets(&manifest), &catalog)
            .await
            .unwrap_err();
        match err {
            BootstrapError::IndexConflict { collection, index, .. } => {
                assert_eq!(collection, "users");
                assert_eq!(index, "email_1");
            }
            other => panic!("expected an index conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_keys_different_uniqueness_is_a_conflict() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        catalog.seed_index(
            "users",
            IndexState {
                name: "users_email_idx".into(),
                keys: vec![IndexKey {
                    field: "email".into(),
                    order: SortOrder::Asc,
                }],
                unique: false,
            },
        );

        let err = apply(&manifest, &secrets(&manifest), &catalog)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("users_email_idx"));
    }

    #[tokio::test]
    async fn equivalent_index_under_another_name_is_skipped() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        catalog.seed_index(
            "users",
            IndexState {
                name: "users_email_idx".into(),
                keys: vec![IndexKey {
                    field: "email".into(),
                    order: SortOrder::Asc,
                }],
                unique: true,
            },
        );

        let report = apply(&manifest, &secrets(&manifest), &catalog).await.unwrap();
        assert!(report.skipped_indexes.contains(&"users.email_1".to_string()));
        assert_eq!(report.created_indexes.len(), 3);
    }

    #[tokio::test]
    async fn existing_users_are_skipped_without_a_password() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        let seeded = secrets(&manifest);
        apply(&manifest, &seeded, &catalog).await.unwrap();

        // Second run: the user exists, so no password is ever needed.
        let report = apply(&manifest, &Secrets::default(), &catalog).await.unwrap();
        assert_eq!(report.skipped_users, vec!["lms_app_user"]);
    }

    #[tokio::test]
    async fn missing_password_fails_before_user_creation() {
        let manifest = lms_manifest();
        let catalog = MemoryCatalog::default();
        let err = apply(&manifest, &Secrets::default(), &catalog)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidSpec { .. }));
        // Nothing was mutated past the failing step.
        assert_eq!(catalog.snapshot()["collections"], json!({}));
    }
}
