//! Schema migration.
//!
//! The physical layout (stores and indexes) is derived from the collection
//! schemas. Opening an instance first compares the stored layout with the
//! derived one inside a read-only transaction. Only when they differ is the
//! database reopened at the next version, and the same comparison runs again
//! inside the version-change transaction, this time applying each step.
//!
//! Stores and indexes absent from the schemas are deleted, along with their
//! data.

use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionSchema, BACKLINK_INDEX, LINK_SOURCE_FIELD, LINK_TARGET_FIELD};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use weave_storage::{
    Durability, IndexInfo, KeyPath, KvDatabase, KvTransaction, StorageError, StoreOptions,
    TransactionMode,
};

/// One step turning the stored layout into the required one.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOperation {
    /// Create a store.
    CreateStore {
        /// Store name.
        name: String,
        /// Key options.
        options: StoreOptions,
    },
    /// Delete a store and its records.
    DeleteStore {
        /// Store name.
        name: String,
    },
    /// Create an index, indexing existing records.
    CreateIndex {
        /// Store the index lives in.
        store: String,
        /// Index description.
        index: IndexInfo,
    },
    /// Delete an index.
    DeleteIndex {
        /// Store the index lives in.
        store: String,
        /// Index name.
        index: String,
    },
}

/// Required layout of one store.
struct StoreLayout {
    name: String,
    options: StoreOptions,
    indexes: Vec<IndexInfo>,
}

fn required_layout(schemas: &[CollectionSchema]) -> Vec<StoreLayout> {
    let mut layout = Vec::new();
    for schema in schemas {
        layout.push(StoreLayout {
            name: schema.name.clone(),
            options: StoreOptions {
                key_path: None,
                auto_increment: true,
            },
            indexes: schema
                .indexes
                .iter()
                .map(|index| index.to_index_info(schema))
                .collect(),
        });
        for name in schema.link_store_names() {
            layout.push(StoreLayout {
                name,
                options: StoreOptions {
                    key_path: Some(KeyPath::Compound(vec![
                        LINK_SOURCE_FIELD.to_string(),
                        LINK_TARGET_FIELD.to_string(),
                    ])),
                    auto_increment: false,
                },
                indexes: vec![IndexInfo::new(
                    BACKLINK_INDEX,
                    KeyPath::Single(LINK_TARGET_FIELD.to_string()),
                )],
            });
        }
    }
    layout
}

/// Compares the layout visible to `txn` with the one `schemas` require.
/// An empty plan means the layout already matches.
pub(crate) fn plan(
    txn: &KvTransaction,
    schemas: &[CollectionSchema],
) -> CoreResult<Vec<MigrationOperation>> {
    let existing: HashSet<String> = txn.store_names().into_iter().collect();
    let required = required_layout(schemas);
    let mut ops = Vec::new();

    for store in &required {
        let recreate = existing.contains(&store.name)
            && txn.store_options(&store.name)? != store.options;
        if recreate {
            warn!(store = %store.name, "store key options changed; recreating it");
            ops.push(MigrationOperation::DeleteStore {
                name: store.name.clone(),
            });
        }
        if recreate || !existing.contains(&store.name) {
            ops.push(MigrationOperation::CreateStore {
                name: store.name.clone(),
                options: store.options.clone(),
            });
            ops.extend(store.indexes.iter().map(|index| MigrationOperation::CreateIndex {
                store: store.name.clone(),
                index: index.clone(),
            }));
            continue;
        }

        let current = txn.index_names(&store.name)?;
        for index in &store.indexes {
            if current.contains(&index.name) {
                if txn.index_info(&store.name, &index.name)? == *index {
                    continue;
                }
                ops.push(MigrationOperation::DeleteIndex {
                    store: store.name.clone(),
                    index: index.name.clone(),
                });
            }
            ops.push(MigrationOperation::CreateIndex {
                store: store.name.clone(),
                index: index.clone(),
            });
        }
        for name in current {
            if !store.indexes.iter().any(|index| index.name == name) {
                ops.push(MigrationOperation::DeleteIndex {
                    store: store.name.clone(),
                    index: name,
                });
            }
        }
    }

    let required: HashSet<&str> = required.iter().map(|s| s.name.as_str()).collect();
    let mut stale: Vec<String> = existing
        .into_iter()
        .filter(|name| !required.contains(name.as_str()))
        .collect();
    stale.sort();
    ops.extend(stale.into_iter().map(|name| MigrationOperation::DeleteStore { name }));
    Ok(ops)
}

/// Applies a plan inside a version-change transaction.
pub(crate) fn apply(txn: &KvTransaction, ops: &[MigrationOperation]) -> CoreResult<()> {
    for op in ops {
        debug!(?op, "migration step");
        match op {
            MigrationOperation::CreateStore { name, options } => {
                txn.create_store(name, options.clone())?;
            }
            MigrationOperation::DeleteStore { name } => txn.delete_store(name)?,
            MigrationOperation::CreateIndex { store, index } => {
                txn.create_index(store, index.clone())?;
            }
            MigrationOperation::DeleteIndex { store, index } => txn.delete_index(store, index)?,
        }
    }
    Ok(())
}

fn dry_run(db: &KvDatabase, schemas: &[CollectionSchema]) -> CoreResult<Vec<MigrationOperation>> {
    let txn = db.transaction(db.store_names(), TransactionMode::ReadOnly, Durability::Default)?;
    let ops = plan(&txn, schemas)?;
    txn.abort();
    Ok(ops)
}

/// Brings the layout of `db` in line with `schemas`. Returns the steps
/// applied, empty if the layout already matched.
///
/// Fails with [`CoreError::SchemaMismatch`] if another handle upgraded the
/// database in between to a layout that still does not match.
pub(crate) fn migrate(
    db: &KvDatabase,
    schemas: &[CollectionSchema],
) -> CoreResult<Vec<MigrationOperation>> {
    let version = db.version();
    let ops = dry_run(db, schemas)?;
    if ops.is_empty() {
        return Ok(ops);
    }

    info!(
        database = db.name(),
        from = version,
        to = version + 1,
        steps = ops.len(),
        "upgrading database layout"
    );
    let txn = match db.upgrade(version, version + 1) {
        Ok(txn) => txn,
        Err(StorageError::VersionConflict { expected, actual }) => {
            if dry_run(db, schemas)?.is_empty() {
                debug!(database = db.name(), actual, "layout upgraded concurrently");
                return Ok(Vec::new());
            }
            return Err(CoreError::schema_mismatch(format!(
                "database '{}' moved from version {expected} to {actual} during migration",
                db.name()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let ops = plan(&txn, schemas)?;
    apply(&txn, &ops)?;
    txn.commit()?;
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexSchema, IndexType, PropertyType};
    use weave_storage::KvEnv;

    fn users() -> CollectionSchema {
        CollectionSchema::new("users")
            .property("name", PropertyType::String)
            .property("age", PropertyType::Int)
            .index(IndexSchema::new("name").property("name", IndexType::Value))
            .link("friends", "users")
    }

    #[test]
    fn fresh_database_is_created() {
        let env = KvEnv::new();
        let db = env.open("m");
        let ops = migrate(&db, &[users()]).unwrap();
        assert!(!ops.is_empty());
        assert_eq!(db.version(), 1);
        assert_eq!(
            db.store_names(),
            vec!["_users_users_friends".to_string(), "users".to_string()]
        );

        // Second open is a no-op.
        assert!(migrate(&db, &[users()]).unwrap().is_empty());
        assert_eq!(db.version(), 1);
    }

    #[test]
    fn changed_index_is_rebuilt_and_extra_removed() {
        let env = KvEnv::new();
        let db = env.open("m");
        migrate(&db, &[users()]).unwrap();

        let mut changed = users();
        changed.indexes = vec![
            IndexSchema::new("name").unique(true).property("name", IndexType::Value),
            IndexSchema::new("age").property("age", IndexType::Value),
        ];
        let ops = migrate(&db, &[changed.clone()]).unwrap();
        assert!(ops.contains(&MigrationOperation::DeleteIndex {
            store: "users".into(),
            index: "name".into(),
        }));
        assert_eq!(db.version(), 2);

        changed.indexes.truncate(1);
        let ops = migrate(&db, &[changed]).unwrap();
        assert_eq!(
            ops,
            vec![MigrationOperation::DeleteIndex {
                store: "users".into(),
                index: "age".into(),
            }]
        );
    }

    #[test]
    fn dropped_collections_lose_their_stores() {
        let env = KvEnv::new();
        let db = env.open("m");
        let posts = CollectionSchema::new("posts").link("author", "users");
        migrate(&db, &[users(), posts]).unwrap();
        assert_eq!(db.store_names().len(), 4);

        migrate(&db, &[users()]).unwrap();
        assert_eq!(
            db.store_names(),
            vec!["_users_users_friends".to_string(), "users".to_string()]
        );
    }

    #[test]
    fn stale_handle_replans_after_concurrent_upgrade() {
        let env = KvEnv::new();
        let db = env.open("m");
        migrate(&db, &[users()]).unwrap();
        let stale = db.version();

        // Another handle upgrades to a layout that no longer matches.
        let other = env.open("m");
        let txn = other.upgrade(1, 2).unwrap();
        txn.delete_index("users", "name").unwrap();
        txn.commit().unwrap();

        assert!(matches!(
            db.upgrade(stale, stale + 1),
            Err(StorageError::VersionConflict { expected: 1, actual: 2 })
        ));

        // Migrating again starts from the current version and repairs it.
        assert!(!migrate(&db, &[users()]).unwrap().is_empty());
        assert_eq!(db.version(), 3);
    }
}
