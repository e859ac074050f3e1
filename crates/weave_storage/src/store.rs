//! Object stores and their secondary indexes.

use crate::error::{StorageError, StorageResult};
use crate::key::{Key, KeyPath, KeyRange};
use std::collections::{BTreeMap, BTreeSet};
use weave_codec::Value;

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// In-line key path. When set, keys are read from the stored value.
    pub key_path: Option<KeyPath>,
    /// Generate increasing integer keys when no key is supplied.
    pub auto_increment: bool,
}

/// Description of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name, unique within its store.
    pub name: String,
    /// Where index keys are read from.
    pub key_path: KeyPath,
    /// Reject two records with the same index key.
    pub unique: bool,
    /// Index each element of an array value separately.
    pub multi_entry: bool,
}

impl IndexInfo {
    /// Creates a plain (non-unique, single-entry) index description.
    pub fn new(name: impl Into<String>, key_path: KeyPath) -> Self {
        Self {
            name: name.into(),
            key_path,
            unique: false,
            multi_entry: false,
        }
    }

    /// Sets the unique flag.
    #[must_use]
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets the multi-entry flag.
    #[must_use]
    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }

    /// Computes the index keys a stored value produces.
    ///
    /// Values whose key path does not yield a valid key are simply not
    /// indexed. Multi-entry indexes produce one key per distinct valid
    /// element of an array value.
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        match (&self.key_path, self.multi_entry) {
            (KeyPath::Single(name), true) => match value.get(name) {
                Some(Value::Array(items)) => {
                    let distinct: BTreeSet<Key> = items.iter().filter_map(Key::from_value).collect();
                    distinct.into_iter().collect()
                }
                Some(other) => Key::from_value(other).into_iter().collect(),
                None => Vec::new(),
            },
            (path, _) => path.evaluate(value).into_iter().collect(),
        }
    }
}

/// A secondary index: index key to the set of primary keys carrying it.
#[derive(Debug, Clone)]
pub(crate) struct StoreIndex {
    pub(crate) info: IndexInfo,
    pub(crate) entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl StoreIndex {
    fn insert(&mut self, index_key: Key, primary: &Key) {
        self.entries
            .entry(index_key)
            .or_default()
            .insert(primary.clone());
    }

    fn remove(&mut self, index_key: &Key, primary: &Key) {
        if let Some(set) = self.entries.get_mut(index_key) {
            set.remove(primary);
            if set.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }

    fn conflicts(&self, index_key: &Key, primary: &Key) -> bool {
        self.info.unique
            && self
                .entries
                .get(index_key)
                .is_some_and(|set| set.iter().any(|pk| pk != primary))
    }
}

/// An ordered map of primary key to record plus its indexes.
#[derive(Debug, Clone)]
pub(crate) struct ObjectStore {
    pub(crate) name: String,
    pub(crate) options: StoreOptions,
    next_key: i64,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, StoreIndex>,
}

impl ObjectStore {
    pub(crate) fn new(name: impl Into<String>, options: StoreOptions) -> Self {
        Self {
            name: name.into(),
            options,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn index(&self, name: &str) -> StorageResult<&StoreIndex> {
        self.indexes
            .get(name)
            .ok_or_else(|| StorageError::IndexNotFound {
                store: self.name.clone(),
                index: name.to_string(),
            })
    }

    /// Writes a record, returning its primary key.
    ///
    /// Nothing is modified if the write fails.
    pub(crate) fn put(
        &mut self,
        value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> StorageResult<Key> {
        let (primary, generated) = self.resolve_key(&value, key)?;

        if no_overwrite && self.records.contains_key(&primary) {
            return Err(StorageError::constraint(
                &self.name,
                format!("key {primary:?} already exists"),
            ));
        }

        let mut new_entries = Vec::with_capacity(self.indexes.len());
        for (name, index) in &self.indexes {
            let keys = index.info.keys_for(&value);
            if let Some(conflict) = keys.iter().find(|k| index.conflicts(k, &primary)) {
                return Err(StorageError::constraint(
                    &self.name,
                    format!("unique index '{name}' already contains {conflict:?}"),
                ));
            }
            new_entries.push((name.clone(), keys));
        }

        self.unindex(&primary);
        for (name, keys) in new_entries {
            if let Some(index) = self.indexes.get_mut(&name) {
                for k in keys {
                    index.insert(k, &primary);
                }
            }
        }
        self.records.insert(primary.clone(), value);

        if generated {
            self.next_key += 1;
        } else {
            self.bump_generator(&primary);
        }
        Ok(primary)
    }

    fn resolve_key(&self, value: &Value, key: Option<Key>) -> StorageResult<(Key, bool)> {
        match (&self.options.key_path, key) {
            (Some(_), Some(_)) => Err(StorageError::invalid_key(format!(
                "store '{}' uses in-line keys, an explicit key is not allowed",
                self.name
            ))),
            (Some(path), None) => path
                .evaluate(value)
                .map(|k| (k, false))
                .ok_or_else(|| StorageError::invalid_key("key path did not yield a valid key")),
            (None, Some(key)) => Ok((key, false)),
            (None, None) if self.options.auto_increment => Ok((Key::from(self.next_key), true)),
            (None, None) => Err(StorageError::invalid_key(format!(
                "store '{}' requires an explicit key",
                self.name
            ))),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn bump_generator(&mut self, key: &Key) {
        if !self.options.auto_increment {
            return;
        }
        if let Key::Number(n) = key {
            if *n >= self.next_key as f64 {
                self.next_key = n.floor().min(i64::MAX as f64 - 1.0) as i64 + 1;
            }
        }
    }

    fn unindex(&mut self, primary: &Key) {
        let Some(old) = self.records.get(primary) else {
            return;
        };
        for index in self.indexes.values_mut() {
            for k in index.info.keys_for(old) {
                index.remove(&k, primary);
            }
        }
    }

    /// Deletes all records in the range, returning how many were removed.
    pub(crate) fn delete(&mut self, range: &KeyRange) -> usize {
        let keys: Vec<Key> = match range.bounds() {
            Some(bounds) => self.records.range(bounds).map(|(k, _)| k.clone()).collect(),
            None => return 0,
        };
        for key in &keys {
            self.unindex(key);
            self.records.remove(key);
        }
        keys.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    pub(crate) fn count(&self, range: &KeyRange) -> usize {
        range
            .bounds()
            .map_or(0, |bounds| self.records.range(bounds).count())
    }

    /// Creates an index and populates it from existing records.
    pub(crate) fn create_index(&mut self, info: IndexInfo) -> StorageResult<()> {
        if self.indexes.contains_key(&info.name) {
            return Err(StorageError::constraint(
                &self.name,
                format!("index '{}' already exists", info.name),
            ));
        }
        if info.multi_entry && matches!(info.key_path, KeyPath::Compound(_)) {
            return Err(StorageError::invalid_key(
                "multi-entry indexes require a single-property key path",
            ));
        }

        let mut index = StoreIndex {
            info,
            entries: BTreeMap::new(),
        };
        for (primary, value) in &self.records {
            for k in index.info.keys_for(value) {
                if index.conflicts(&k, primary) {
                    return Err(StorageError::constraint(
                        &self.name,
                        format!("existing records violate unique index '{}'", index.info.name),
                    ));
                }
                index.insert(k, primary);
            }
        }
        self.indexes.insert(index.info.name.clone(), index);
        Ok(())
    }

    pub(crate) fn delete_index(&mut self, name: &str) -> StorageResult<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::IndexNotFound {
                store: self.name.clone(),
                index: name.to_string(),
            })
    }
}
