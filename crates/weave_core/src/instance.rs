//! Instance facade.

use crate::broadcast::{BroadcastHub, ChangeMessage};
use crate::collection::Collection;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::migration::{self, MigrationOperation};
use crate::schema::{verify_schemas, CollectionSchema};
use crate::transaction::{Changes, Txn};
use crate::watch::NotifyContext;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weave_storage::{Durability, KvDatabase, KvEnv, TransactionMode};

/// An open database with its collections.
///
/// `Instance` is the entry point of WeaveDB. It opens (and if needed
/// migrates) a database for a set of collection schemas, hands out
/// transactions, and dispatches committed changes to watchers.
///
/// # Opening an Instance
///
/// ```rust,ignore
/// use weave_core::{CollectionSchema, Config, Instance, PropertyType, Record};
///
/// let users = CollectionSchema::new("users").property("name", PropertyType::String);
/// let db = Instance::open("app", vec![users], Config::default())?;
/// let users = db.collection("users")?;
///
/// let ids = db.write_txn(|txn| users.put_all(txn, vec![Record::new().set("name", "Ada")]))?;
/// let ada = db.read_txn(|txn| users.get(txn, ids[0]))?;
///
/// db.close(false)?;
/// ```
///
/// Clones share the same underlying instance.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

pub(crate) struct InstanceInner {
    name: String,
    context: Uuid,
    env: Arc<KvEnv>,
    db: KvDatabase,
    hub: Arc<BroadcastHub>,
    config: Config,
    collections: BTreeMap<String, Arc<Collection>>,
    receiver: Mutex<Option<Receiver<Vec<u8>>>>,
    migration: Vec<MigrationOperation>,
    closed: AtomicBool,
}

impl Instance {
    /// Opens `name` in the process-wide environment and broadcast hub.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for invalid schemas and
    /// [`CoreError::SchemaMismatch`] if the layout could not be migrated.
    pub fn open(name: &str, schemas: Vec<CollectionSchema>, config: Config) -> CoreResult<Self> {
        Self::open_in(KvEnv::global(), BroadcastHub::global(), name, schemas, config)
    }

    /// Opens `name` in the given environment and broadcast hub.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_in(
        env: Arc<KvEnv>,
        hub: Arc<BroadcastHub>,
        name: &str,
        schemas: Vec<CollectionSchema>,
        config: Config,
    ) -> CoreResult<Self> {
        if config.verify_schema {
            verify_schemas(&schemas)?;
        }

        let db = env.open(name);
        let migration = match migration::migrate(&db, &schemas) {
            Ok(ops) => ops,
            Err(e) => {
                db.close();
                return Err(e);
            }
        };

        let collections = schemas
            .iter()
            .map(|schema| {
                let collection = Collection::new(schema.clone(), &schemas);
                (schema.name.clone(), Arc::new(collection))
            })
            .collect();

        let context = Uuid::new_v4();
        let receiver = config.broadcast.then(|| hub.subscribe(name, context));
        info!(
            database = name,
            version = db.version(),
            collections = schemas.len(),
            migrated = !migration.is_empty(),
            "opened instance"
        );

        Ok(Self {
            inner: Arc::new(InstanceInner {
                name: name.to_string(),
                context,
                env,
                db,
                hub,
                config,
                collections,
                receiver: Mutex::new(receiver),
                migration,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configuration the instance was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Layout version of the database.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.db.version()
    }

    /// Migration steps applied when this instance opened.
    #[must_use]
    pub fn migration(&self) -> &[MigrationOperation] {
        &self.inner.migration
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Looks up a collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] for unknown names.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.inner
            .collections
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::collection_not_found(name))
    }

    /// Names of all collections.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.collections.keys().cloned().collect()
    }

    /// Begins a transaction spanning every collection.
    ///
    /// Write transactions are serialized: beginning one waits for the
    /// previous writer to finish.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceClosed`] after close.
    pub fn begin_txn(&self, write: bool) -> CoreResult<Txn> {
        self.inner.begin_txn(write)
    }

    /// Runs `f` in a write transaction, committing on `Ok` and aborting on
    /// `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of the commit.
    pub fn write_txn<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Txn) -> CoreResult<T>,
    {
        self.run_txn(true, f)
    }

    /// Runs `f` in a read transaction.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`.
    pub fn read_txn<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Txn) -> CoreResult<T>,
    {
        self.run_txn(false, f)
    }

    fn run_txn<F, T>(&self, write: bool, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Txn) -> CoreResult<T>,
    {
        let txn = self.begin_txn(write)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    /// Replays changes committed by other instances of the same database
    /// through this instance's watchers. Returns the number of messages
    /// handled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceClosed`] after close.
    pub fn process_external_changes(&self) -> CoreResult<usize> {
        self.inner.ensure_open()?;
        let messages: Vec<Vec<u8>> = match self.inner.receiver.lock().as_ref() {
            Some(receiver) => receiver.try_iter().collect(),
            None => return Ok(0),
        };
        let mut handled = 0;
        for bytes in messages {
            match ChangeMessage::decode(&bytes) {
                Ok(Some(message)) if message.instance_name == self.inner.name => {
                    self.inner.notify_watchers(&message.changes, true);
                    handled += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(database = %self.inner.name, error = %e, "ignoring broadcast message"),
            }
        }
        Ok(handled)
    }

    /// Closes the instance, dropping every watcher. With `delete_from_disk`
    /// the database is removed from its environment.
    ///
    /// Closing twice does nothing.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for storage backends that flush.
    pub fn close(&self, delete_from_disk: bool) -> CoreResult<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.hub.unsubscribe(&inner.name, inner.context);
        inner.receiver.lock().take();
        for collection in inner.collections.values() {
            collection.watchers().clear();
        }
        inner.db.close();
        if delete_from_disk {
            inner.env.delete_database(&inner.name);
        }
        debug!(database = %inner.name, delete_from_disk, "closed instance");
        Ok(())
    }
}

impl InstanceInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::InstanceClosed);
        }
        Ok(())
    }

    pub(crate) fn begin_txn(self: &Arc<Self>, write: bool) -> CoreResult<Txn> {
        self.ensure_open()?;
        let (mode, durability) = if write {
            (TransactionMode::ReadWrite, self.config.durability())
        } else {
            (TransactionMode::ReadOnly, Durability::Default)
        };
        let kv = self.db.transaction(self.db.store_names(), mode, durability)?;
        debug!(database = %self.name, txn = kv.id(), write, "began transaction");
        Ok(Txn::new(Arc::clone(self), kv, write))
    }

    /// Dispatches committed changes to watchers and, for local commits,
    /// to other instances.
    pub(crate) fn notify_watchers(self: &Arc<Self>, changes: &Changes, external: bool) {
        if self.is_closed() {
            return;
        }
        debug!(database = %self.name, collections = changes.len(), external, "notifying watchers");
        {
            let ctx = NotifyContext::new(|| self.begin_txn(false));
            for (name, set) in changes {
                if let Some(collection) = self.collections.get(name) {
                    collection.notify(set, &ctx);
                }
            }
        }

        if !external && self.config.broadcast {
            let message = ChangeMessage {
                instance_name: self.name.clone(),
                changes: changes.clone(),
            };
            match message.encode() {
                Ok(bytes) => {
                    self.hub.publish(&self.name, self.context, &bytes);
                }
                Err(e) => warn!(database = %self.name, error = %e, "failed to encode broadcast"),
            }
        }
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.name, self.context);
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("collections", &self.collection_names())
            .field("is_closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::schema::{IndexSchema, IndexType, PropertyType};
    use weave_codec::Value;

    fn schemas() -> Vec<CollectionSchema> {
        vec![CollectionSchema::new("users")
            .property("name", PropertyType::String)
            .index(IndexSchema::new("name").unique(true).property("name", IndexType::Value))]
    }

    fn open(env: &Arc<KvEnv>, hub: &Arc<BroadcastHub>) -> Instance {
        Instance::open_in(env.clone(), hub.clone(), "db", schemas(), Config::default()).unwrap()
    }

    #[test]
    fn open_creates_layout_once() {
        let (env, hub) = (KvEnv::new(), BroadcastHub::new());
        let first = open(&env, &hub);
        assert_eq!(first.version(), 1);
        assert!(!first.migration().is_empty());

        let second = open(&env, &hub);
        assert_eq!(second.version(), 1);
        assert!(second.migration().is_empty());
    }

    #[test]
    fn invalid_schema_is_rejected_before_storage() {
        let env = KvEnv::new();
        let bad = vec![CollectionSchema::new("_bad")];
        let err = Instance::open_in(env.clone(), BroadcastHub::new(), "db", bad, Config::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
        assert!(env.database_names().is_empty());
    }

    #[test]
    fn closure_transactions_commit_and_abort() {
        let db = open(&KvEnv::new(), &BroadcastHub::new());
        let users = db.collection("users").unwrap();

        let ids = db
            .write_txn(|txn| users.put_all(txn, vec![Record::new().set("name", "a")]))
            .unwrap();

        let failed: CoreResult<()> = db.write_txn(|txn| {
            users.put_all(txn, vec![Record::new().set("name", "b")])?;
            Err(CoreError::invalid_operation("stop"))
        });
        assert!(failed.is_err());

        let all = db
            .read_txn(|txn| users.query().build()?.find_all(txn))
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, Some(ids[0]));
        assert_eq!(all[0].get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn failed_operation_aborts_whole_transaction() {
        let db = open(&KvEnv::new(), &BroadcastHub::new());
        let users = db.collection("users").unwrap();
        db.write_txn(|txn| users.put_all(txn, vec![Record::new().set("name", "taken")]))
            .unwrap();

        let txn = db.begin_txn(true).unwrap();
        users.put_all(&txn, vec![Record::new().set("name", "fresh")]).unwrap();
        let err = users
            .put_all(&txn, vec![Record::new().set("name", "taken")])
            .unwrap_err();
        assert!(err.is_constraint());
        assert!(!txn.is_active());
        assert!(txn.commit().is_err());

        let count = db.read_txn(|txn| users.query().build()?.count(txn)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn close_is_idempotent_and_blocks_transactions() {
        let env = KvEnv::new();
        let db = open(&env, &BroadcastHub::new());
        db.close(true).unwrap();
        db.close(true).unwrap();
        assert!(db.is_closed());
        assert!(matches!(db.begin_txn(false), Err(CoreError::InstanceClosed)));
        assert!(env.database_names().is_empty());
    }

    #[test]
    fn unknown_collection() {
        let db = open(&KvEnv::new(), &BroadcastHub::new());
        assert!(matches!(
            db.collection("nope"),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }
}
