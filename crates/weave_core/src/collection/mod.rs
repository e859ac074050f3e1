//! Collections.
//!
//! A collection owns one auto-increment object store holding its records,
//! plus one store per outgoing link. Deleting records cascades into the
//! link stores: forward pairs anchored at a deleted id are removed from this
//! collection's link stores, and pairs targeting it are removed from the
//! link stores of other collections.

use crate::error::{CoreError, CoreResult};
use crate::link::{delete_backlinks, source_range, Link};
use crate::query::QueryBuilder;
use crate::record::{check_id, index_key, Id, Record, RecordCodec};
use crate::schema::CollectionSchema;
use crate::transaction::{ChangeSet, Txn};
use crate::watch::{NotifyContext, StopWatching, WatcherRegistry};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use weave_codec::Value;
use weave_storage::{Key, KeyRange};

/// A collection of records sharing one schema.
pub struct Collection {
    schema: CollectionSchema,
    codec: RecordCodec,
    links: Vec<Link>,
    /// Link stores of other collections that target this one.
    backlink_store_names: Vec<String>,
    /// Multi-entry index name to its list property.
    multi_entry: HashMap<String, String>,
    watchers: Arc<WatcherRegistry>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.schema.name)
            .field("links", &self.links)
            .field("backlink_store_names", &self.backlink_store_names)
            .finish_non_exhaustive()
    }
}

impl Collection {
    /// Builds the collection for `schema` within the full schema set.
    pub(crate) fn new(schema: CollectionSchema, all: &[CollectionSchema]) -> Self {
        let links = schema
            .links
            .iter()
            .map(|l| Link::new(&l.name, &schema.name, &l.target))
            .collect();
        let backlink_store_names = all
            .iter()
            .filter(|other| other.name != schema.name)
            .flat_map(|other| {
                other
                    .links
                    .iter()
                    .filter(|l| l.target == schema.name)
                    .map(|l| crate::schema::link_store_name(&other.name, &l.target, &l.name))
            })
            .collect();
        let multi_entry = schema
            .indexes
            .iter()
            .filter(|index| index.is_multi_entry(&schema))
            .filter_map(|index| {
                let property = index.properties.first()?;
                Some((index.name.clone(), property.name.clone()))
            })
            .collect();
        Self {
            codec: RecordCodec::new(&schema),
            schema,
            links,
            backlink_store_names,
            multi_entry,
            watchers: Arc::default(),
        }
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// The schema this collection was opened with.
    #[must_use]
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Outgoing links.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Looks up an outgoing link by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LinkNotFound`] if no such link is declared.
    pub fn link(&self, name: &str) -> CoreResult<&Link> {
        self.links
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| CoreError::LinkNotFound {
                collection: self.name().to_string(),
                link: name.to_string(),
            })
    }

    pub(crate) fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Property of a multi-entry index, `None` for other indexes.
    pub(crate) fn multi_entry_property(&self, index: &str) -> Option<&str> {
        self.multi_entry.get(index).map(String::as_str)
    }

    /// Keys `record` would have in `index`, computed without storage.
    pub(crate) fn index_keys(&self, index: &str, record: &Record) -> Vec<Key> {
        let Some(schema_index) = self.schema.index_named(index) else {
            return Vec::new();
        };
        let stored = self.codec.encode(record);
        if let Some(property) = self.multi_entry_property(index) {
            return match stored.get(property) {
                Some(Value::Array(items)) => items.iter().filter_map(Key::from_value).collect(),
                _ => Vec::new(),
            };
        }
        schema_index.key_path().evaluate(&stored).into_iter().collect()
    }

    fn check_index(&self, index: &str) -> CoreResult<()> {
        if self.schema.index_named(index).is_none() {
            return Err(CoreError::IndexNotFound {
                collection: self.name().to_string(),
                index: index.to_string(),
            });
        }
        Ok(())
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if the read fails.
    pub fn get(&self, txn: &Txn, id: Id) -> CoreResult<Option<Record>> {
        txn.guarded(|| {
            let stored = txn.kv().get(self.name(), &Key::from(id))?;
            Ok(stored.map(|value| self.codec.decode(id, &value)))
        })
    }

    /// Reads several records. The result has one entry per id, in input
    /// order, `None` for missing records.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn get_all(&self, txn: &Txn, ids: &[Id]) -> CoreResult<Vec<Option<Record>>> {
        ids.iter().map(|&id| self.get(txn, id)).collect()
    }

    /// Reads the first record for each index key. The result has one entry
    /// per key, in input order. On a multi-entry index a record matches a
    /// key if any element of its list equals it.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if the index is
    /// unknown, a key is not indexable or a read fails.
    pub fn get_all_by_index(
        &self,
        txn: &Txn,
        index: &str,
        keys: &[Value],
    ) -> CoreResult<Vec<Option<Record>>> {
        txn.guarded(|| {
            self.check_index(index)?;
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                let range = KeyRange::only(index_key(key)?);
                let found = txn.kv().index_get(self.name(), index, &range)?;
                records.push(found.and_then(|(pk, value)| {
                    pk.as_i64().map(|id| self.codec.decode(id, &value))
                }));
            }
            Ok(records)
        })
    }

    /// Writes records. Records without an id get a fresh one; records with
    /// an id replace the stored record in place. Returns the ids in input
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) on a unique index
    /// conflict, an id beyond [`MAX_SAFE_ID`](crate::MAX_SAFE_ID) in
    /// magnitude, or if a write fails.
    pub fn put_all(&self, txn: &Txn, records: Vec<Record>) -> CoreResult<Vec<Id>> {
        txn.guarded(|| {
            for id in records.iter().filter_map(|r| r.id) {
                check_id(id)?;
            }
            let mut ids = Vec::with_capacity(records.len());
            for mut record in records {
                let stored = self.codec.encode(&record);
                let key = txn.kv().put(self.name(), stored, record.id.map(Key::from))?;
                let id = key.as_i64().ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "store '{}' produced non-integer key {key:?}",
                        self.name()
                    ))
                })?;
                trace!(collection = self.name(), id, "put");
                record.id = Some(id);
                txn.with_change_set(self.name(), |set| set.register_change(id, Some(record)));
                ids.push(id);
            }
            Ok(ids)
        })
    }

    /// Deletes records and every link pair they take part in. Missing ids
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if a write fails.
    pub fn delete_all(&self, txn: &Txn, ids: &[Id]) -> CoreResult<()> {
        txn.guarded(|| {
            for &id in ids {
                txn.kv().delete(self.name(), &KeyRange::only(Key::from(id)))?;
            }
            txn.with_change_set(self.name(), |set| {
                for &id in ids {
                    set.register_change(id, None);
                }
            });
            self.delete_links(txn, ids)
        })
    }

    /// Deletes every record matching any of `keys` in `index`, with link
    /// cascade. Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if the index is
    /// unknown, a key is not indexable or a write fails.
    pub fn delete_all_by_index(&self, txn: &Txn, index: &str, keys: &[Value]) -> CoreResult<usize> {
        txn.guarded(|| {
            self.check_index(index)?;
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            for key in keys {
                let range = KeyRange::only(index_key(key)?);
                for pk in txn.kv().index_get_all_keys(self.name(), index, &range)? {
                    if let Some(id) = pk.as_i64() {
                        if seen.insert(id) {
                            ids.push(id);
                        }
                    }
                }
            }
            self.delete_all(txn, &ids)?;
            Ok(ids.len())
        })
    }

    fn delete_links(&self, txn: &Txn, ids: &[Id]) -> CoreResult<()> {
        for link in &self.links {
            for &id in ids {
                txn.kv().delete(link.store_name(), &source_range(id))?;
            }
        }
        for store in &self.backlink_store_names {
            for &id in ids {
                delete_backlinks(txn, store, id)?;
            }
        }
        Ok(())
    }

    /// Empties the collection, its own link stores and every link store of
    /// other collections that targets it.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if a write fails.
    pub fn clear(&self, txn: &Txn) -> CoreResult<()> {
        txn.guarded(|| {
            let kv = txn.kv();
            kv.clear(self.name())?;
            for store in &self.backlink_store_names {
                kv.clear(store)?;
            }
            for link in &self.links {
                kv.clear(link.store_name())?;
            }
            txn.with_change_set(self.name(), ChangeSet::register_cleared);
            Ok(())
        })
    }

    /// Starts a query over this collection.
    #[must_use]
    pub fn query(self: &Arc<Self>) -> QueryBuilder {
        QueryBuilder::new(Arc::clone(self))
    }

    /// Calls `callback` after every commit that changes this collection.
    pub fn watch_lazy<F>(&self, callback: F) -> StopWatching
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.watchers.watch_collection(Arc::new(callback))
    }

    /// Calls `callback` with the new state of record `id` after every commit
    /// that writes or deletes it.
    pub fn watch_object<F>(&self, id: Id, callback: F) -> StopWatching
    where
        F: Fn(Option<&Record>) + Send + Sync + 'static,
    {
        self.watchers.watch_object(id, Arc::new(callback))
    }

    pub(crate) fn watchers(&self) -> &Arc<WatcherRegistry> {
        &self.watchers
    }

    /// Number of watchers registered on this collection and its queries.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    pub(crate) fn notify(&self, changes: &ChangeSet, ctx: &NotifyContext<'_>) {
        self.watchers.notify(changes, ctx);
    }
}
