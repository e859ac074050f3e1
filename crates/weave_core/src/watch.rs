//! Watchers.
//!
//! Three kinds of watchers hang off a collection: collection watchers fire
//! on any change, object watchers follow a single id, and query watchers
//! follow a [`Query`]. Query watchers are either lazy (told that something
//! may have changed) or live (handed fresh results).
//!
//! Dispatch happens after a commit. Callbacks run without any registry lock
//! held, so they may register or stop watchers. A panicking callback is
//! logged and does not stop the round.

use crate::error::CoreResult;
use crate::query::Query;
use crate::record::{Id, Record};
use crate::transaction::{ChangeSet, Txn};
use once_cell::unsync::OnceCell;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Callback told that a collection or query result may have changed.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback handed the new state of a watched record, `None` once deleted.
pub type ObjectCallback = Arc<dyn Fn(Option<&Record>) + Send + Sync>;

/// Callback handed the fresh results of a live query.
pub type QueryCallback = Arc<dyn Fn(&[Record]) + Send + Sync>;

#[derive(Clone)]
enum QueryListener {
    Lazy(ChangeCallback),
    Live(QueryCallback),
}

#[derive(Clone)]
struct QueryWatcher {
    query: Query,
    listener: QueryListener,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKey {
    Collection(u64),
    Object(Id, u64),
    Query(u64),
}

/// Handle returned when registering a watcher.
///
/// Watchers stay registered until [`stop`](Self::stop) is called or the
/// instance closes; dropping the handle does not unregister.
#[derive(Debug)]
#[must_use = "the handle is the only way to stop the watcher"]
pub struct StopWatching {
    registry: Weak<WatcherRegistry>,
    key: WatchKey,
}

impl StopWatching {
    /// Unregisters the watcher. Stopping after the instance closed does
    /// nothing.
    pub fn stop(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.key);
        }
    }
}

/// Lazily opened read transaction shared by the live queries of one round.
pub(crate) struct NotifyContext<'a> {
    open: Box<dyn Fn() -> CoreResult<Txn> + 'a>,
    txn: OnceCell<Txn>,
}

impl<'a> NotifyContext<'a> {
    pub(crate) fn new(open: impl Fn() -> CoreResult<Txn> + 'a) -> Self {
        Self {
            open: Box::new(open),
            txn: OnceCell::new(),
        }
    }

    fn txn(&self) -> CoreResult<&Txn> {
        self.txn.get_or_try_init(|| (self.open)())
    }
}

/// Watchers of one collection.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    next_id: AtomicU64,
    collection: RwLock<BTreeMap<u64, ChangeCallback>>,
    objects: RwLock<BTreeMap<Id, BTreeMap<u64, ObjectCallback>>>,
    queries: RwLock<BTreeMap<u64, QueryWatcher>>,
}

impl WatcherRegistry {
    fn handle(self: &Arc<Self>, key: WatchKey) -> StopWatching {
        StopWatching {
            registry: Arc::downgrade(self),
            key,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn watch_collection(self: &Arc<Self>, callback: ChangeCallback) -> StopWatching {
        let id = self.next_id();
        self.collection.write().insert(id, callback);
        self.handle(WatchKey::Collection(id))
    }

    pub(crate) fn watch_object(self: &Arc<Self>, object: Id, callback: ObjectCallback) -> StopWatching {
        let id = self.next_id();
        self.objects.write().entry(object).or_default().insert(id, callback);
        self.handle(WatchKey::Object(object, id))
    }

    pub(crate) fn watch_query_lazy(self: &Arc<Self>, query: Query, callback: ChangeCallback) -> StopWatching {
        self.insert_query(query, QueryListener::Lazy(callback))
    }

    pub(crate) fn watch_query(self: &Arc<Self>, query: Query, callback: QueryCallback) -> StopWatching {
        self.insert_query(query, QueryListener::Live(callback))
    }

    fn insert_query(self: &Arc<Self>, query: Query, listener: QueryListener) -> StopWatching {
        let id = self.next_id();
        self.queries.write().insert(id, QueryWatcher { query, listener });
        self.handle(WatchKey::Query(id))
    }

    fn remove(&self, key: WatchKey) {
        match key {
            WatchKey::Collection(id) => {
                self.collection.write().remove(&id);
            }
            WatchKey::Object(object, id) => {
                let mut objects = self.objects.write();
                if let Some(callbacks) = objects.get_mut(&object) {
                    callbacks.remove(&id);
                    if callbacks.is_empty() {
                        objects.remove(&object);
                    }
                }
            }
            WatchKey::Query(id) => {
                self.queries.write().remove(&id);
            }
        }
    }

    /// Drops every watcher.
    pub(crate) fn clear(&self) {
        self.collection.write().clear();
        self.objects.write().clear();
        self.queries.write().clear();
    }

    /// Number of registered watchers of all kinds.
    pub(crate) fn len(&self) -> usize {
        self.collection.read().len()
            + self.objects.read().values().map(BTreeMap::len).sum::<usize>()
            + self.queries.read().len()
    }

    fn object_callbacks(&self, object: Id) -> Vec<ObjectCallback> {
        self.objects
            .read()
            .get(&object)
            .map(|callbacks| callbacks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Dispatches one committed change set.
    pub(crate) fn notify(&self, changes: &ChangeSet, ctx: &NotifyContext<'_>) {
        if changes.is_empty() {
            return;
        }

        let collection: Vec<ChangeCallback> = self.collection.read().values().cloned().collect();
        for callback in collection {
            invoke("collection", || callback());
        }

        let queries: Vec<QueryWatcher> = self.queries.read().values().cloned().collect();
        if changes.cleared() || !changes.deleted().is_empty() {
            // A deletion may affect any result; the records are gone.
            for watcher in &queries {
                fire_query(watcher, ctx);
            }
        } else {
            let mut pending: Vec<&QueryWatcher> = queries.iter().collect();
            for (id, record) in changes.added() {
                if pending.is_empty() {
                    break;
                }
                pending.retain(|watcher| {
                    if watcher.query.where_clause_and_filter_match(*id, record) {
                        fire_query(watcher, ctx);
                        false
                    } else {
                        true
                    }
                });
            }
        }

        if changes.cleared() {
            let objects: Vec<(Id, Vec<ObjectCallback>)> = self
                .objects
                .read()
                .iter()
                .map(|(id, callbacks)| (*id, callbacks.values().cloned().collect()))
                .collect();
            for (id, callbacks) in objects {
                let record = changes.added().get(&id);
                for callback in callbacks {
                    invoke("object", || callback(record));
                }
            }
        } else {
            for id in changes.deleted() {
                for callback in self.object_callbacks(*id) {
                    invoke("object", || callback(None));
                }
            }
            for (id, record) in changes.added() {
                for callback in self.object_callbacks(*id) {
                    invoke("object", || callback(Some(record)));
                }
            }
        }
    }
}

fn fire_query(watcher: &QueryWatcher, ctx: &NotifyContext<'_>) {
    match &watcher.listener {
        QueryListener::Lazy(callback) => invoke("query", || callback()),
        QueryListener::Live(callback) => {
            let results = ctx.txn().and_then(|txn| watcher.query.find_all(txn));
            match results {
                Ok(records) => invoke("query", || callback(&records)),
                Err(e) => warn!(error = %e, "live query evaluation failed"),
            }
        }
    }
}

fn invoke(kind: &'static str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(watcher = kind, "watcher callback panicked");
    }
}
