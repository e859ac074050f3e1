//! Cursors over stores and indexes.

use crate::error::{StorageError, StorageResult};
use crate::key::{as_ref, check_bounds, Key, KeyRange};
use crate::store::ObjectStore;
use crate::transaction::KvTransaction;
use std::ops::Bound;
use weave_codec::Value;

/// Iteration order of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    /// Ascending.
    #[default]
    Next,
    /// Ascending, one entry per distinct index key.
    NextUnique,
    /// Descending.
    Prev,
    /// Descending, one entry per distinct index key. The entry reported
    /// for each key is the one with the lowest primary key.
    PrevUnique,
}

impl CursorDirection {
    /// Returns true for ascending directions.
    #[must_use]
    pub fn is_forward(self) -> bool {
        matches!(self, Self::Next | Self::NextUnique)
    }

    /// Returns true for directions that skip duplicate index keys.
    #[must_use]
    pub fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }
}

/// One position of a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    /// The index key, or the primary key for store cursors.
    pub key: Key,
    /// The primary key of the record.
    pub primary_key: Key,
    /// The record.
    pub value: Value,
}

/// A cursor walking a store or index inside a transaction.
///
/// Each step re-seeks from the last reported position, so the cursor sees
/// writes the transaction makes while iterating.
#[derive(Debug)]
pub struct Cursor<'t> {
    txn: &'t KvTransaction,
    store: String,
    index: Option<String>,
    range: KeyRange,
    direction: CursorDirection,
    position: Option<(Key, Key)>,
    skip: usize,
    finished: bool,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(
        txn: &'t KvTransaction,
        store: String,
        index: Option<String>,
        range: KeyRange,
        direction: CursorDirection,
    ) -> Self {
        Self {
            txn,
            store,
            index,
            range,
            direction,
            position: None,
            skip: 0,
            finished: false,
        }
    }

    /// Skips the next `count` entries.
    pub fn advance(&mut self, count: usize) {
        self.skip = self.skip.saturating_add(count);
    }

    /// Moves to the next entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction ended or the store disappeared.
    pub fn next_entry(&mut self) -> StorageResult<Option<CursorEntry>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let step = self.txn.with_store(&self.store, |store| self.seek(store));
            let entry = match step {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            };
            self.position = Some((entry.key.clone(), entry.primary_key.clone()));
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            return Ok(Some(entry));
        }
    }

    fn seek(&self, store: &ObjectStore) -> StorageResult<Option<CursorEntry>> {
        match &self.index {
            None => Ok(self.seek_store(store)),
            Some(index) => self.seek_index(store, index),
        }
    }

    /// Bounds of the remaining outer key space, excluding the current key.
    fn remaining(&self) -> Option<(Bound<&Key>, Bound<&Key>)> {
        let lower = as_ref(&self.range.lower);
        let upper = as_ref(&self.range.upper);
        match &self.position {
            None => check_bounds(lower, upper),
            Some((key, _)) if self.direction.is_forward() => {
                check_bounds(Bound::Excluded(key), upper)
            }
            Some((key, _)) => check_bounds(lower, Bound::Excluded(key)),
        }
    }

    fn seek_store(&self, store: &ObjectStore) -> Option<CursorEntry> {
        let bounds = self.remaining()?;
        let mut range = store.records.range(bounds);
        let (key, value) = if self.direction.is_forward() {
            range.next()?
        } else {
            range.next_back()?
        };
        Some(CursorEntry {
            key: key.clone(),
            primary_key: key.clone(),
            value: value.clone(),
        })
    }

    fn seek_index(&self, store: &ObjectStore, index: &str) -> StorageResult<Option<CursorEntry>> {
        let entries = &store.index(index)?.entries;
        let forward = self.direction.is_forward();

        // Same index key, next primary key.
        let mut found = None;
        if let (Some((key, primary)), false) = (&self.position, self.direction.is_unique()) {
            if let Some(primaries) = entries.get(key) {
                let next = if forward {
                    primaries
                        .range((Bound::Excluded(primary), Bound::Unbounded))
                        .next()
                } else {
                    primaries
                        .range((Bound::Unbounded, Bound::Excluded(primary)))
                        .next_back()
                };
                found = next.map(|pk| (key.clone(), pk.clone()));
            }
        }

        if found.is_none() {
            let Some(bounds) = self.remaining() else {
                return Ok(None);
            };
            let mut range = entries.range(bounds);
            let next = if forward { range.next() } else { range.next_back() };
            found = next.and_then(|(key, primaries)| {
                let pk = if forward || self.direction.is_unique() {
                    primaries.iter().next()
                } else {
                    primaries.iter().next_back()
                };
                pk.map(|pk| (key.clone(), pk.clone()))
            });
        }

        let Some((key, primary_key)) = found else {
            return Ok(None);
        };
        let value = store
            .records
            .get(&primary_key)
            .cloned()
            .ok_or_else(|| StorageError::invalid_key("index entry refers to a missing record"))?;
        Ok(Some(CursorEntry {
            key,
            primary_key,
            value,
        }))
    }
}

impl Iterator for Cursor<'_> {
    type Item = StorageResult<CursorEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
