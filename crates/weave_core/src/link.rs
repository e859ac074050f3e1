//! Link storage.
//!
//! Every link declared on a collection owns a dedicated store of `{a, b}`
//! pairs keyed by `[a, b]`, where `a` is the source id and `b` the target id.
//! A non-unique `backlink` index on `b` serves reverse traversal.

use crate::error::CoreResult;
use crate::record::Id;
use crate::schema::{link_store_name, BACKLINK_INDEX, LINK_SOURCE_FIELD, LINK_TARGET_FIELD};
use crate::transaction::Txn;
use weave_codec::Value;
use weave_storage::{Key, KeyRange};

/// A directed link between two collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    name: String,
    source: String,
    target: String,
    store_name: String,
}

impl Link {
    pub(crate) fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let source = source.into();
        let target = target.into();
        let store_name = link_store_name(&source, &target, &name);
        Self {
            name,
            source,
            target,
            store_name,
        }
    }

    /// Link name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source collection.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Target collection.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Name of the store holding this link's pairs.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Adds and removes pairs for the record `id`.
    ///
    /// With `backlink` set, `id` is a record of the target collection and the
    /// other ids are sources. Adding a pair that already exists fails with a
    /// constraint error; removing a missing pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if a write fails.
    pub fn update(
        &self,
        txn: &Txn,
        backlink: bool,
        id: Id,
        added: &[Id],
        deleted: &[Id],
    ) -> CoreResult<()> {
        txn.guarded(|| {
            let kv = txn.kv();
            for &other in added {
                let (source, target) = orient(backlink, id, other);
                kv.add(&self.store_name, link_entry(source, target), None)?;
            }
            for &other in deleted {
                let (source, target) = orient(backlink, id, other);
                kv.delete(&self.store_name, &KeyRange::only(pair_key(source, target)))?;
            }
            Ok(())
        })
    }

    /// Removes every pair of the record `id` on the given side.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if a write fails.
    pub fn clear(&self, txn: &Txn, id: Id, backlink: bool) -> CoreResult<()> {
        txn.guarded(|| {
            if backlink {
                delete_backlinks(txn, &self.store_name, id)
            } else {
                txn.kv().delete(&self.store_name, &source_range(id))?;
                Ok(())
            }
        })
    }

    /// Returns the ids linked to `id`, in id order.
    ///
    /// Forward traversal yields targets of the source `id`; with `backlink`
    /// set it yields the sources pointing at the target `id`.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn load(&self, txn: &Txn, id: Id, backlink: bool) -> CoreResult<Vec<Id>> {
        txn.guarded(|| {
            let kv = txn.kv();
            let keys = if backlink {
                kv.index_get_all_keys(&self.store_name, BACKLINK_INDEX, &KeyRange::only(Key::from(id)))?
            } else {
                kv.get_all(&self.store_name, &source_range(id), None)?
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect()
            };
            Ok(keys
                .iter()
                .filter_map(pair_from_key)
                .map(|(source, target)| if backlink { source } else { target })
                .collect())
        })
    }
}

fn orient(backlink: bool, id: Id, other: Id) -> (Id, Id) {
    if backlink {
        (other, id)
    } else {
        (id, other)
    }
}

fn link_entry(source: Id, target: Id) -> Value {
    Value::object([(LINK_SOURCE_FIELD, source), (LINK_TARGET_FIELD, target)])
}

fn pair_key(source: Id, target: Id) -> Key {
    Key::Array(vec![Key::from(source), Key::from(target)])
}

/// Splits a link store primary key into `(source, target)`.
pub(crate) fn pair_from_key(key: &Key) -> Option<(Id, Id)> {
    match key.as_array()? {
        [source, target] => Some((source.as_i64()?, target.as_i64()?)),
        _ => None,
    }
}

/// Every pair whose source is `id`.
pub(crate) fn source_range(id: Id) -> KeyRange {
    let bound = |edge: f64| Key::Array(vec![Key::from(id), Key::Number(edge)]);
    KeyRange::bound(bound(f64::NEG_INFINITY), bound(f64::INFINITY), false, false)
}

/// Deletes every pair of `store` whose target is `id`.
pub(crate) fn delete_backlinks(txn: &Txn, store: &str, id: Id) -> CoreResult<()> {
    let kv = txn.kv();
    let keys = kv.index_get_all_keys(store, BACKLINK_INDEX, &KeyRange::only(Key::from(id)))?;
    for key in keys {
        kv.delete(store, &KeyRange::only(key))?;
    }
    Ok(())
}
