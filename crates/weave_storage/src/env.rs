//! Named databases and the environment that owns them.

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;
use crate::transaction::{Durability, KvTransaction, TransactionMode};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static GLOBAL_ENV: Lazy<Arc<KvEnv>> = Lazy::new(KvEnv::new);

/// Committed state of one database.
#[derive(Debug, Default)]
pub(crate) struct DbState {
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, Arc<ObjectStore>>,
    pub(crate) deleted: bool,
}

/// State shared by every handle to the same database.
#[derive(Debug)]
pub(crate) struct DbShared {
    pub(crate) name: String,
    pub(crate) state: RwLock<DbState>,
    /// Serializes write and version-change transactions.
    pub(crate) writer: Arc<Mutex<()>>,
    next_txn_id: AtomicU64,
}

impl DbShared {
    fn new(name: String) -> Self {
        Self {
            name,
            state: RwLock::new(DbState::default()),
            writer: Arc::new(Mutex::new(())),
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// A process-wide registry of named databases.
///
/// Every [`KvDatabase`] opened with the same name from the same environment
/// sees the same committed data, which is what lets several instances of a
/// database coexist in one process.
#[derive(Debug, Default)]
pub struct KvEnv {
    databases: Mutex<HashMap<String, Arc<DbShared>>>,
}

impl KvEnv {
    /// Creates an empty, isolated environment.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the process-wide environment.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_ENV)
    }

    /// Opens a database, creating it at version 0 if it does not exist.
    pub fn open(&self, name: &str) -> KvDatabase {
        let shared = {
            let mut databases = self.databases.lock();
            Arc::clone(
                databases
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(DbShared::new(name.to_string()))),
            )
        };
        tracing::debug!(database = name, "opened database handle");
        KvDatabase {
            shared,
            closed: AtomicBool::new(false),
        }
    }

    /// Deletes a database and all of its stores.
    ///
    /// Existing handles to it report [`StorageError::Closed`] afterwards.
    /// Returns `false` if no such database existed.
    pub fn delete_database(&self, name: &str) -> bool {
        let removed = self.databases.lock().remove(name);
        match removed {
            Some(shared) => {
                let mut state = shared.state.write();
                state.deleted = true;
                state.stores.clear();
                tracing::info!(database = name, "deleted database");
                true
            }
            None => false,
        }
    }

    /// Returns the names of all databases in this environment.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// A handle to one named database.
#[derive(Debug)]
pub struct KvDatabase {
    shared: Arc<DbShared>,
    closed: AtomicBool,
}

impl KvDatabase {
    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the committed schema version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.shared.state.read().version
    }

    /// Returns the names of all committed object stores, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.shared.state.read().stores.keys().cloned().collect()
    }

    /// Returns true once [`close`](Self::close) was called or the database
    /// was deleted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.shared.state.read().deleted
    }

    /// Closes this handle. Other handles are unaffected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Begins a transaction over the given stores.
    ///
    /// Read-only transactions see a snapshot taken at begin. Read-write
    /// transactions are serialized: beginning one blocks until the previous
    /// writer finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or a scoped store does not
    /// exist.
    pub fn transaction<I, S>(
        &self,
        scope: I,
        mode: TransactionMode,
        durability: Durability,
    ) -> StorageResult<KvTransaction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let scope: BTreeSet<String> = scope.into_iter().map(Into::into).collect();

        let writer = match mode {
            TransactionMode::ReadWrite => Some(self.shared.writer.lock_arc()),
            TransactionMode::ReadOnly => None,
        };

        let stores = {
            let state = self.shared.state.read();
            if state.deleted {
                return Err(StorageError::Closed);
            }
            let mut stores = BTreeMap::new();
            for name in &scope {
                let store = state
                    .stores
                    .get(name)
                    .ok_or_else(|| StorageError::store_not_found(name))?;
                stores.insert(name.clone(), Arc::clone(store));
            }
            stores
        };

        Ok(KvTransaction::new(
            Arc::clone(&self.shared),
            mode,
            durability,
            scope,
            None,
            stores,
            writer,
        ))
    }

    /// Begins a version-change transaction moving the database from
    /// `expected_version` to `new_version`.
    ///
    /// Only one such transaction (or any writer) runs at a time. The new
    /// version becomes visible when the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VersionConflict`] if the committed version is
    /// not `expected_version` or `new_version` does not move it forward.
    pub fn upgrade(&self, expected_version: u32, new_version: u32) -> StorageResult<KvTransaction> {
        self.ensure_open()?;
        let writer = self.shared.writer.lock_arc();

        let stores = {
            let state = self.shared.state.read();
            if state.deleted {
                return Err(StorageError::Closed);
            }
            if state.version != expected_version || new_version <= state.version {
                return Err(StorageError::VersionConflict {
                    expected: expected_version,
                    actual: state.version,
                });
            }
            state.stores.clone()
        };

        tracing::debug!(
            database = %self.shared.name,
            from = expected_version,
            to = new_version,
            "beginning version change"
        );
        let scope = stores.keys().cloned().collect();
        Ok(KvTransaction::new(
            Arc::clone(&self.shared),
            TransactionMode::ReadWrite,
            Durability::Strict,
            scope,
            Some(new_version),
            stores,
            Some(writer),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, KeyRange};
    use crate::store::StoreOptions;
    use weave_codec::Value;

    fn with_store(env: &KvEnv, name: &str) -> KvDatabase {
        let db = env.open(name);
        let txn = db.upgrade(0, 1).unwrap();
        txn.create_store("items", StoreOptions::default()).unwrap();
        txn.commit().unwrap();
        db
    }

    #[test]
    fn handles_share_committed_state() {
        let env = KvEnv::new();
        let a = with_store(&env, "shared");
        let b = env.open("shared");
        assert_eq!(b.version(), 1);
        assert_eq!(b.store_names(), vec!["items".to_string()]);

        let txn = a
            .transaction(["items"], TransactionMode::ReadWrite, Durability::Default)
            .unwrap();
        txn.put("items", Value::from("x"), Some(Key::from(1))).unwrap();
        txn.commit().unwrap();

        let read = b
            .transaction(["items"], TransactionMode::ReadOnly, Durability::Default)
            .unwrap();
        assert_eq!(read.get("items", &Key::from(1)).unwrap(), Some(Value::from("x")));
    }

    #[test]
    fn upgrade_requires_expected_version() {
        let env = KvEnv::new();
        let db = with_store(&env, "v");
        let err = db.upgrade(0, 2).unwrap_err();
        assert_eq!(err, StorageError::VersionConflict { expected: 0, actual: 1 });
        assert!(db.upgrade(1, 1).is_err());
        assert!(db.upgrade(1, 2).is_ok());
    }

    #[test]
    fn aborted_upgrade_keeps_version() {
        let env = KvEnv::new();
        let db = env.open("aborted");
        let txn = db.upgrade(0, 1).unwrap();
        txn.create_store("items", StoreOptions::default()).unwrap();
        txn.abort();
        assert_eq!(db.version(), 0);
        assert!(db.store_names().is_empty());
    }

    #[test]
    fn missing_store_in_scope_fails() {
        let env = KvEnv::new();
        let db = env.open("empty");
        let err = db
            .transaction(["nope"], TransactionMode::ReadOnly, Durability::Default)
            .unwrap_err();
        assert!(matches!(err, StorageError::StoreNotFound { .. }));
    }

    #[test]
    fn delete_database_closes_handles() {
        let env = KvEnv::new();
        let db = with_store(&env, "gone");
        assert!(env.delete_database("gone"));
        assert!(!env.delete_database("gone"));
        assert!(db.is_closed());
        let err = db
            .transaction(["items"], TransactionMode::ReadOnly, Durability::Default)
            .unwrap_err();
        assert_eq!(err, StorageError::Closed);

        let fresh = env.open("gone");
        assert_eq!(fresh.version(), 0);
        let count = {
            let txn = with_store(&env, "other")
                .transaction(["items"], TransactionMode::ReadOnly, Durability::Default)
                .unwrap();
            txn.count("items", &KeyRange::all()).unwrap()
        };
        assert_eq!(count, 0);
    }

    #[test]
    fn closed_handle_rejects_transactions() {
        let env = KvEnv::new();
        let db = with_store(&env, "closed");
        db.close();
        assert!(db.upgrade(1, 2).is_err());
        assert!(!env.open("closed").is_closed());
    }
}
