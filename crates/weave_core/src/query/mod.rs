//! Query engine.
//!
//! A query is the union of its where clauses (id ranges, index ranges and
//! link traversals), narrowed by an optional filter, then optionally sorted,
//! deduplicated, offset and limited.
//!
//! Without a sort, the engine stops walking cursors as soon as
//! `offset + limit` results are collected. With a sort, every match must be
//! visited first.

mod builder;

pub use builder::QueryBuilder;

use crate::collection::Collection;
use crate::error::CoreResult;
use crate::link::{pair_from_key, source_range, Link};
use crate::record::{Id, Record};
use crate::schema::BACKLINK_INDEX;
use crate::transaction::Txn;
use crate::watch::StopWatching;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use weave_codec::{to_canonical_cbor, Value};
use weave_storage::{CursorDirection, Key, KeyRange};

/// Record predicate.
pub type Filter = Arc<dyn Fn(Id, &Record) -> bool + Send + Sync>;

/// Result ordering.
pub type Comparator = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// Distinct key extractor.
pub type DistinctBy = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// One source of candidate records.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// Records whose id lies in the range.
    IdRange {
        /// Id range.
        range: KeyRange,
    },
    /// Records whose index key lies in the range. For multi-entry indexes a
    /// record matches if any element does.
    IndexRange {
        /// Index name.
        index: String,
        /// Index key range.
        range: KeyRange,
    },
    /// Records reachable through a link from `id`.
    Link {
        /// The link to traverse.
        link: Link,
        /// Traverse from target to source.
        backlink: bool,
        /// Anchor record.
        id: Id,
    },
}

/// An executable query over one collection.
#[derive(Clone)]
pub struct Query {
    collection: Arc<Collection>,
    where_clauses: Vec<WhereClause>,
    direction: CursorDirection,
    filter: Option<Filter>,
    sort: Option<Comparator>,
    distinct: Option<DistinctBy>,
    offset: usize,
    limit: usize,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection.name())
            .field("where_clauses", &self.where_clauses)
            .field("direction", &self.direction)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

/// Accumulates unsorted results across where clauses.
struct Collector<'q> {
    filter: Option<&'q Filter>,
    distinct: Option<&'q DistinctBy>,
    limit: usize,
    ids: HashSet<Id>,
    distinct_keys: HashSet<Vec<u8>>,
    results: Vec<Record>,
}

impl Collector<'_> {
    fn is_full(&self) -> bool {
        self.results.len() >= self.limit
    }

    /// Offers a candidate. Returns false once no more are wanted.
    fn accept(&mut self, id: Id, record: Record) -> CoreResult<bool> {
        if !self.ids.insert(id) {
            return Ok(true);
        }
        if let Some(filter) = self.filter {
            if !filter(id, &record) {
                return Ok(true);
            }
        }
        if let Some(distinct) = self.distinct {
            if !self.distinct_keys.insert(to_canonical_cbor(&distinct(&record))?) {
                return Ok(true);
            }
        }
        self.results.push(record);
        Ok(!self.is_full())
    }
}

impl Query {
    /// The queried collection.
    #[must_use]
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// The where clauses, with the full id range standing in for none.
    fn clauses(&self) -> Cow<'_, [WhereClause]> {
        if self.where_clauses.is_empty() {
            Cow::Owned(vec![WhereClause::IdRange {
                range: KeyRange::all(),
            }])
        } else {
            Cow::Borrowed(&self.where_clauses)
        }
    }

    fn find_internal(&self, txn: &Txn, offset: usize, limit: usize) -> CoreResult<Vec<Record>> {
        let unsorted = self.sort.is_none();
        let mut collector = Collector {
            filter: self.filter.as_ref(),
            distinct: if unsorted { self.distinct.as_ref() } else { None },
            limit: if unsorted {
                offset.saturating_add(limit)
            } else {
                usize::MAX
            },
            ids: HashSet::new(),
            distinct_keys: HashSet::new(),
            results: Vec::new(),
        };

        for clause in self.clauses().iter() {
            if collector.is_full() {
                break;
            }
            self.scan(txn, clause, &mut collector)?;
        }

        let mut results = collector.results;
        if let Some(sort) = &self.sort {
            results.sort_by(|a, b| sort(a, b));
            if let Some(distinct) = &self.distinct {
                let mut seen = HashSet::new();
                let mut unique = Vec::with_capacity(results.len());
                for record in results {
                    if seen.insert(to_canonical_cbor(&distinct(&record))?) {
                        unique.push(record);
                    }
                }
                results = unique;
            }
        }
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    fn scan(&self, txn: &Txn, clause: &WhereClause, collector: &mut Collector<'_>) -> CoreResult<()> {
        let kv = txn.kv();
        match clause {
            WhereClause::Link { link, backlink, id } => {
                let (index, range) = if *backlink {
                    (Some(BACKLINK_INDEX), KeyRange::only(Key::from(*id)))
                } else {
                    (None, source_range(*id))
                };
                for entry in kv.open_cursor(link.store_name(), index, range, self.direction)? {
                    let Some((source, target)) = pair_from_key(&entry?.primary_key) else {
                        continue;
                    };
                    let other = if *backlink { source } else { target };
                    // Dangling pairs are skipped.
                    if let Some(record) = self.collection.get(txn, other)? {
                        if !collector.accept(other, record)? {
                            break;
                        }
                    }
                }
            }
            WhereClause::IdRange { range } => {
                self.scan_store(txn, None, range, collector)?;
            }
            WhereClause::IndexRange { index, range } => {
                self.scan_store(txn, Some(index.as_str()), range, collector)?;
            }
        }
        Ok(())
    }

    fn scan_store(
        &self,
        txn: &Txn,
        index: Option<&str>,
        range: &KeyRange,
        collector: &mut Collector<'_>,
    ) -> CoreResult<()> {
        let multi_entry = index.and_then(|name| self.collection.multi_entry_property(name));
        let cursor = txn
            .kv()
            .open_cursor(self.collection.name(), index, range.clone(), self.direction)?;
        for entry in cursor {
            let entry = entry?;
            if let Some(property) = multi_entry {
                if !matches!(entry.value.get(property), Some(Value::Array(_))) {
                    continue;
                }
            }
            let Some(id) = entry.primary_key.as_i64() else {
                continue;
            };
            let record = self.collection.codec().decode(id, &entry.value);
            if !collector.accept(id, record)? {
                break;
            }
        }
        Ok(())
    }

    /// Returns the first result.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn find_first(&self, txn: &Txn) -> CoreResult<Option<Record>> {
        txn.guarded(|| {
            let first = self.find_internal(txn, self.offset, self.limit.min(1))?;
            Ok(first.into_iter().next())
        })
    }

    /// Returns all results.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn find_all(&self, txn: &Txn) -> CoreResult<Vec<Record>> {
        txn.guarded(|| self.find_internal(txn, self.offset, self.limit))
    }

    /// Every filtered result, ignoring offset and limit.
    fn find_unpaged(&self, txn: &Txn) -> CoreResult<Vec<Record>> {
        txn.guarded(|| self.find_internal(txn, 0, usize::MAX))
    }

    /// Deletes the first result, with link cascade. Returns whether a record
    /// was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if a read or write
    /// fails.
    pub fn delete_first(&self, txn: &Txn) -> CoreResult<bool> {
        txn.guarded(|| {
            let first = self.find_internal(txn, self.offset, self.limit.min(1))?;
            let Some(id) = first.first().and_then(|r| r.id) else {
                return Ok(false);
            };
            self.collection.delete_all(txn, &[id])?;
            Ok(true)
        })
    }

    /// Deletes all results, with link cascade. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts the transaction) if a read or write
    /// fails.
    pub fn delete_all(&self, txn: &Txn) -> CoreResult<usize> {
        txn.guarded(|| {
            let ids: Vec<Id> = self
                .find_internal(txn, self.offset, self.limit)?
                .iter()
                .filter_map(|r| r.id)
                .collect();
            self.collection.delete_all(txn, &ids)?;
            Ok(ids.len())
        })
    }

    /// Numeric values of `property` across all filtered results, regardless
    /// of offset and limit. Nulls, missing and non-numeric values are skipped.
    fn numbers(&self, txn: &Txn, property: &str) -> CoreResult<Vec<(f64, Value)>> {
        Ok(self
            .find_unpaged(txn)?
            .into_iter()
            .filter_map(|mut record| {
                let value = record.fields.remove(property)?;
                Some((value.as_number()?, value))
            })
            .collect())
    }

    /// Smallest value of a numeric property, `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn min(&self, txn: &Txn, property: &str) -> CoreResult<Option<Value>> {
        Ok(self
            .numbers(txn, property)?
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, value)| value))
    }

    /// Largest value of a numeric property, `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn max(&self, txn: &Txn, property: &str) -> CoreResult<Option<Value>> {
        Ok(self
            .numbers(txn, property)?
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, value)| value))
    }

    /// Sum of a numeric property, `0.0` over no values.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn sum(&self, txn: &Txn, property: &str) -> CoreResult<f64> {
        Ok(self.numbers(txn, property)?.iter().map(|(n, _)| n).sum())
    }

    /// Mean of a numeric property, NaN over no values.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self, txn: &Txn, property: &str) -> CoreResult<f64> {
        let numbers = self.numbers(txn, property)?;
        let sum: f64 = numbers.iter().map(|(n, _)| n).sum();
        Ok(sum / numbers.len() as f64)
    }

    /// Number of filtered results. Like the other aggregates, offset and
    /// limit do not apply.
    ///
    /// # Errors
    ///
    /// Returns an error (and aborts a write transaction) if a read fails.
    pub fn count(&self, txn: &Txn) -> CoreResult<usize> {
        Ok(self.find_unpaged(txn)?.len())
    }

    /// Calls `callback` with fresh results after every commit that may
    /// change them.
    ///
    /// A commit that only adds records re-runs the query if one of them
    /// matches; a commit that deletes or clears always does.
    pub fn watch<F>(&self, callback: F) -> StopWatching
    where
        F: Fn(&[Record]) + Send + Sync + 'static,
    {
        self.collection
            .watchers()
            .watch_query(self.clone(), Arc::new(callback))
    }

    /// Like [`watch`](Self::watch), but only signals without re-running
    /// the query.
    pub fn watch_lazy<F>(&self, callback: F) -> StopWatching
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.collection
            .watchers()
            .watch_query_lazy(self.clone(), Arc::new(callback))
    }

    /// Decides, without touching storage, whether a record would be
    /// returned by this query. Link clauses match unconditionally.
    #[must_use]
    pub fn where_clause_and_filter_match(&self, id: Id, record: &Record) -> bool {
        let matched = self.clauses().iter().any(|clause| match clause {
            WhereClause::Link { .. } => true,
            WhereClause::IdRange { range } => range.includes(&Key::from(id)),
            WhereClause::IndexRange { index, range } => self
                .collection
                .index_keys(index, record)
                .iter()
                .any(|key| range.includes(key)),
        });
        matched && self.filter.as_ref().map_or(true, |filter| filter(id, record))
    }
}
