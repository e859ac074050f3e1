//! Transactions over a database snapshot.

use crate::cursor::{Cursor, CursorDirection};
use crate::env::DbShared;
use crate::error::{StorageError, StorageResult};
use crate::key::{Key, KeyRange};
use crate::store::{IndexInfo, ObjectStore, StoreOptions};
use parking_lot::{Mutex, RawMutex};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use weave_codec::Value;

type WriterGuard = parking_lot::lock_api::ArcMutexGuard<RawMutex, ()>;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; runs concurrently with anything.
    ReadOnly,
    /// Reads and writes; serialized with other writers.
    ReadWrite,
}

/// Durability hint for a write transaction.
///
/// The in-memory substrate commits synchronously, so the hint is recorded
/// and reported but does not change behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Substrate default.
    #[default]
    Default,
    /// Commit only once the data is durable.
    Strict,
    /// Allow commit before the data is durable.
    Relaxed,
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Operations may be issued.
    Active,
    /// Changes were published.
    Committed,
    /// Changes were discarded.
    Aborted,
}

struct TxnInner {
    state: TransactionState,
    stores: BTreeMap<String, Arc<ObjectStore>>,
    dirty: BTreeSet<String>,
    writer: Option<WriterGuard>,
}

/// A transaction over a set of object stores.
///
/// Reads observe the snapshot taken when the transaction began plus the
/// transaction's own writes. Writes are copy-on-write per store and become
/// visible to new transactions atomically on [`commit`](Self::commit).
/// Dropping an active transaction aborts it.
pub struct KvTransaction {
    id: u64,
    shared: Arc<DbShared>,
    mode: TransactionMode,
    durability: Durability,
    scope: BTreeSet<String>,
    upgrade_to: Option<u32>,
    inner: Mutex<TxnInner>,
}

impl fmt::Debug for KvTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvTransaction")
            .field("id", &self.id)
            .field("database", &self.shared.name)
            .field("mode", &self.mode)
            .field("upgrade_to", &self.upgrade_to)
            .field("state", &self.inner.lock().state)
            .finish_non_exhaustive()
    }
}

impl KvTransaction {
    pub(crate) fn new(
        shared: Arc<DbShared>,
        mode: TransactionMode,
        durability: Durability,
        scope: BTreeSet<String>,
        upgrade_to: Option<u32>,
        stores: BTreeMap<String, Arc<ObjectStore>>,
        writer: Option<WriterGuard>,
    ) -> Self {
        let id = shared.next_txn_id();
        tracing::trace!(txn = id, database = %shared.name, ?mode, "transaction begun");
        Self {
            id,
            shared,
            mode,
            durability,
            scope,
            upgrade_to,
            inner: Mutex::new(TxnInner {
                state: TransactionState::Active,
                stores,
                dirty: BTreeSet::new(),
                writer,
            }),
        }
    }

    /// Returns the transaction id, unique per database.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns the durability hint.
    #[must_use]
    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Returns the version this transaction upgrades to, if it is a
    /// version-change transaction.
    #[must_use]
    pub fn upgrade_version(&self) -> Option<u32> {
        self.upgrade_to
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Returns true while operations may be issued.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    fn check_scope(&self, store: &str) -> StorageResult<()> {
        if self.upgrade_to.is_none() && !self.scope.contains(store) {
            return Err(StorageError::NotInScope {
                store: store.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn with_store<R>(
        &self,
        store: &str,
        f: impl FnOnce(&ObjectStore) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.check_scope(store)?;
        let inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(StorageError::TransactionInactive);
        }
        let object_store = inner
            .stores
            .get(store)
            .ok_or_else(|| StorageError::store_not_found(store))?;
        f(object_store)
    }

    fn with_store_mut<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut ObjectStore) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.check_scope(store)?;
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(StorageError::TransactionInactive);
        }
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        let object_store = inner
            .stores
            .get_mut(store)
            .ok_or_else(|| StorageError::store_not_found(store))?;
        let result = f(Arc::make_mut(object_store))?;
        inner.dirty.insert(store.to_string());
        Ok(result)
    }

    fn with_schema<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Arc<ObjectStore>>) -> StorageResult<R>,
    ) -> StorageResult<R> {
        if self.upgrade_to.is_none() {
            return Err(StorageError::NotVersionChange);
        }
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(StorageError::TransactionInactive);
        }
        f(&mut inner.stores)
    }

    /// Reads the record stored under `key`.
    pub fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>> {
        self.with_store(store, |s| Ok(s.records.get(key).cloned()))
    }

    /// Reads all records in the range in key order, up to `limit`.
    pub fn get_all(
        &self,
        store: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> StorageResult<Vec<(Key, Value)>> {
        self.with_store(store, |s| {
            let Some(bounds) = range.bounds() else {
                return Ok(Vec::new());
            };
            Ok(s.records
                .range(bounds)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }

    /// Inserts or replaces a record, returning its primary key.
    ///
    /// `key` must be `None` for stores with an in-line key path.
    pub fn put(&self, store: &str, value: Value, key: Option<Key>) -> StorageResult<Key> {
        let key = self.with_store_mut(store, |s| s.put(value, key, false))?;
        tracing::trace!(txn = self.id, store, ?key, "put");
        Ok(key)
    }

    /// Inserts a record, failing if the key already exists.
    pub fn add(&self, store: &str, value: Value, key: Option<Key>) -> StorageResult<Key> {
        let key = self.with_store_mut(store, |s| s.put(value, key, true))?;
        tracing::trace!(txn = self.id, store, ?key, "add");
        Ok(key)
    }

    /// Deletes every record in the range, returning how many were removed.
    pub fn delete(&self, store: &str, range: &KeyRange) -> StorageResult<usize> {
        let removed = self.with_store_mut(store, |s| Ok(s.delete(range)))?;
        tracing::trace!(txn = self.id, store, removed, "delete");
        Ok(removed)
    }

    /// Removes every record from the store.
    pub fn clear(&self, store: &str) -> StorageResult<()> {
        self.with_store_mut(store, |s| {
            s.clear();
            Ok(())
        })
    }

    /// Counts the records in the range.
    pub fn count(&self, store: &str, range: &KeyRange) -> StorageResult<usize> {
        self.with_store(store, |s| Ok(s.count(range)))
    }

    /// Returns the first record (by index key, then primary key) whose index
    /// key lies in the range.
    pub fn index_get(
        &self,
        store: &str,
        index: &str,
        range: &KeyRange,
    ) -> StorageResult<Option<(Key, Value)>> {
        self.with_store(store, |s| {
            let idx = s.index(index)?;
            let Some(bounds) = range.bounds() else {
                return Ok(None);
            };
            let first = idx
                .entries
                .range(bounds)
                .find_map(|(_, primaries)| primaries.iter().next());
            Ok(first.and_then(|pk| s.records.get(pk).map(|v| (pk.clone(), v.clone()))))
        })
    }

    /// Returns the primary keys of all records whose index key lies in the
    /// range, ordered by index key and then primary key. A record matching
    /// several multi-entry keys appears once per key.
    pub fn index_get_all_keys(
        &self,
        store: &str,
        index: &str,
        range: &KeyRange,
    ) -> StorageResult<Vec<Key>> {
        self.with_store(store, |s| {
            let idx = s.index(index)?;
            let Some(bounds) = range.bounds() else {
                return Ok(Vec::new());
            };
            Ok(idx
                .entries
                .range(bounds)
                .flat_map(|(_, primaries)| primaries.iter().cloned())
                .collect())
        })
    }

    /// Counts index entries in the range.
    pub fn index_count(&self, store: &str, index: &str, range: &KeyRange) -> StorageResult<usize> {
        self.with_store(store, |s| {
            let idx = s.index(index)?;
            Ok(range.bounds().map_or(0, |bounds| {
                idx.entries.range(bounds).map(|(_, p)| p.len()).sum()
            }))
        })
    }

    /// Opens a cursor over a store, or over one of its indexes.
    pub fn open_cursor(
        &self,
        store: &str,
        index: Option<&str>,
        range: KeyRange,
        direction: CursorDirection,
    ) -> StorageResult<Cursor<'_>> {
        // Validate eagerly so a bad name fails here and not on first step.
        self.with_store(store, |s| match index {
            Some(name) => s.index(name).map(|_| ()),
            None => Ok(()),
        })?;
        Ok(Cursor::new(
            self,
            store.to_string(),
            index.map(str::to_string),
            range,
            direction,
        ))
    }

    /// Returns the names of the stores visible to this transaction.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.inner.lock().stores.keys().cloned().collect()
    }

    /// Returns the options a store was created with.
    pub fn store_options(&self, store: &str) -> StorageResult<StoreOptions> {
        self.with_store(store, |s| Ok(s.options.clone()))
    }

    /// Returns the index names of a store, sorted.
    pub fn index_names(&self, store: &str) -> StorageResult<Vec<String>> {
        self.with_store(store, |s| Ok(s.indexes.keys().cloned().collect()))
    }

    /// Returns the description of one index.
    pub fn index_info(&self, store: &str, index: &str) -> StorageResult<IndexInfo> {
        self.with_store(store, |s| Ok(s.index(index)?.info.clone()))
    }

    /// Creates an object store. Version-change transactions only.
    pub fn create_store(&self, name: &str, options: StoreOptions) -> StorageResult<()> {
        self.with_schema(|stores| {
            if stores.contains_key(name) {
                return Err(StorageError::constraint(name, "store already exists"));
            }
            stores.insert(name.to_string(), Arc::new(ObjectStore::new(name, options)));
            Ok(())
        })?;
        tracing::debug!(txn = self.id, store = name, "created store");
        Ok(())
    }

    /// Deletes an object store and its data. Version-change transactions only.
    pub fn delete_store(&self, name: &str) -> StorageResult<()> {
        self.with_schema(|stores| {
            stores
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| StorageError::store_not_found(name))
        })?;
        tracing::debug!(txn = self.id, store = name, "deleted store");
        Ok(())
    }

    /// Creates an index over existing records. Version-change transactions
    /// only.
    pub fn create_index(&self, store: &str, info: IndexInfo) -> StorageResult<()> {
        let name = info.name.clone();
        self.with_schema(|stores| {
            let s = stores
                .get_mut(store)
                .ok_or_else(|| StorageError::store_not_found(store))?;
            Arc::make_mut(s).create_index(info)
        })?;
        tracing::debug!(txn = self.id, store, index = %name, "created index");
        Ok(())
    }

    /// Deletes an index. Version-change transactions only.
    pub fn delete_index(&self, store: &str, index: &str) -> StorageResult<()> {
        self.with_schema(|stores| {
            let s = stores
                .get_mut(store)
                .ok_or_else(|| StorageError::store_not_found(store))?;
            Arc::make_mut(s).delete_index(index)
        })?;
        tracing::debug!(txn = self.id, store, index, "deleted index");
        Ok(())
    }

    /// Publishes all writes atomically and ends the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionInactive`] if the transaction has
    /// already ended, or [`StorageError::Closed`] if the database was deleted
    /// meanwhile (the transaction is then aborted).
    pub fn commit(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(StorageError::TransactionInactive);
        }

        if self.mode == TransactionMode::ReadWrite {
            let mut db = self.shared.state.write();
            if db.deleted {
                drop(db);
                Self::discard(&mut inner);
                return Err(StorageError::Closed);
            }
            match self.upgrade_to {
                Some(version) => {
                    db.stores = std::mem::take(&mut inner.stores);
                    db.version = version;
                }
                None => {
                    for name in &inner.dirty {
                        if let Some(store) = inner.stores.get(name) {
                            db.stores.insert(name.clone(), Arc::clone(store));
                        }
                    }
                }
            }
        }

        inner.state = TransactionState::Committed;
        inner.stores.clear();
        inner.dirty.clear();
        inner.writer = None;
        tracing::debug!(
            txn = self.id,
            database = %self.shared.name,
            durability = ?self.durability,
            "transaction committed"
        );
        Ok(())
    }

    /// Discards all writes and ends the transaction. Does nothing if the
    /// transaction already ended.
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TransactionState::Active {
            Self::discard(&mut inner);
            tracing::debug!(txn = self.id, database = %self.shared.name, "transaction aborted");
        }
    }

    fn discard(inner: &mut TxnInner) {
        inner.state = TransactionState::Aborted;
        inner.stores.clear();
        inner.dirty.clear();
        inner.writer = None;
    }
}

impl Drop for KvTransaction {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{KvDatabase, KvEnv};
    use crate::key::KeyPath;

    fn database(env: &KvEnv) -> KvDatabase {
        let db = env.open("txn");
        let txn = db.upgrade(0, 1).unwrap();
        txn.create_store(
            "users",
            StoreOptions {
                key_path: Some(KeyPath::Single("id".into())),
                auto_increment: true,
            },
        )
        .unwrap();
        txn.create_index(
            "users",
            IndexInfo::new("age", KeyPath::Single("age".into())),
        )
        .unwrap();
        txn.create_store("notes", StoreOptions::default()).unwrap();
        txn.commit().unwrap();
        db
    }

    fn user(id: i64, age: i64) -> Value {
        Value::object([("id", id), ("age", age)])
    }

    fn write(db: &KvDatabase) -> KvTransaction {
        db.transaction(["users", "notes"], TransactionMode::ReadWrite, Durability::Default)
            .unwrap()
    }

    fn read(db: &KvDatabase) -> KvTransaction {
        db.transaction(["users", "notes"], TransactionMode::ReadOnly, Durability::Default)
            .unwrap()
    }

    #[test]
    fn writes_visible_only_after_commit() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = write(&db);
        txn.put("users", user(1, 30), None).unwrap();
        assert!(txn.get("users", &Key::from(1)).unwrap().is_some());

        let before = read(&db);
        assert!(before.get("users", &Key::from(1)).unwrap().is_none());

        txn.commit().unwrap();
        assert!(before.get("users", &Key::from(1)).unwrap().is_none());
        assert!(read(&db).get("users", &Key::from(1)).unwrap().is_some());
    }

    #[test]
    fn abort_discards_and_is_idempotent() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = write(&db);
        txn.put("users", user(1, 30), None).unwrap();
        txn.abort();
        txn.abort();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.put("users", user(2, 3), None), Err(StorageError::TransactionInactive));
        assert_eq!(read(&db).count("users", &KeyRange::all()).unwrap(), 0);
    }

    #[test]
    fn drop_releases_writer() {
        let env = KvEnv::new();
        let db = database(&env);
        {
            let txn = write(&db);
            txn.put("users", user(1, 30), None).unwrap();
        }
        let txn = write(&db);
        assert_eq!(txn.count("users", &KeyRange::all()).unwrap(), 0);
    }

    #[test]
    fn read_only_rejects_writes() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = read(&db);
        assert_eq!(txn.put("users", user(1, 1), None), Err(StorageError::ReadOnly));
        assert_eq!(txn.clear("notes"), Err(StorageError::ReadOnly));
    }

    #[test]
    fn scope_is_enforced() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = db
            .transaction(["notes"], TransactionMode::ReadOnly, Durability::Default)
            .unwrap();
        assert!(matches!(
            txn.get("users", &Key::from(1)),
            Err(StorageError::NotInScope { .. })
        ));
    }

    #[test]
    fn schema_changes_need_version_change() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = write(&db);
        assert_eq!(
            txn.create_store("x", StoreOptions::default()),
            Err(StorageError::NotVersionChange)
        );
    }

    #[test]
    fn index_lookups_are_ordered() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = write(&db);
        txn.put("users", user(1, 40), None).unwrap();
        txn.put("users", user(2, 20), None).unwrap();
        txn.put("users", user(3, 20), None).unwrap();

        let keys = txn.index_get_all_keys("users", "age", &KeyRange::all()).unwrap();
        assert_eq!(keys, vec![Key::from(2), Key::from(3), Key::from(1)]);

        let (pk, _) = txn
            .index_get("users", "age", &KeyRange::only(Key::from(20)))
            .unwrap()
            .unwrap();
        assert_eq!(pk, Key::from(2));
        assert_eq!(txn.index_count("users", "age", &KeyRange::all()).unwrap(), 3);
        assert!(matches!(
            txn.index_get("users", "nope", &KeyRange::all()),
            Err(StorageError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn get_all_respects_limit() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = write(&db);
        for i in 0..5 {
            txn.put("notes", Value::from(i), Some(Key::from(i64::from(i)))).unwrap();
        }
        let all = txn.get_all("notes", &KeyRange::all(), Some(2)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].0, Key::from(1));
    }

    #[test]
    fn failed_write_keeps_transaction_usable() {
        let env = KvEnv::new();
        let db = database(&env);
        let txn = write(&db);
        txn.add("notes", Value::from("a"), Some(Key::from(1))).unwrap();
        assert!(txn.add("notes", Value::from("b"), Some(Key::from(1))).is_err());
        txn.commit().unwrap();
        let stored = read(&db).get("notes", &Key::from(1)).unwrap();
        assert_eq!(stored, Some(Value::from("a")));
    }
}
