//! Query construction.

use super::{Comparator, DistinctBy, Filter, Query, WhereClause};
use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::link::Link;
use crate::record::{Id, Record};
use std::cmp::Ordering;
use std::sync::Arc;
use weave_codec::Value;
use weave_storage::{CursorDirection, KeyRange};

/// Builder for [`Query`].
///
/// ```rust,ignore
/// let adults = users
///     .query()
///     .index_range("age", KeyRange::lower_bound(Key::from(18), false))
///     .filter(|_, user| user.get("active") == Some(&Value::Bool(true)))
///     .limit(10)
///     .build()?;
/// ```
pub struct QueryBuilder {
    collection: Arc<Collection>,
    where_clauses: Vec<WhereClause>,
    distinct_where: bool,
    descending: bool,
    filter: Option<Filter>,
    sort: Option<Comparator>,
    distinct: Option<DistinctBy>,
    offset: usize,
    limit: Option<usize>,
}

impl QueryBuilder {
    pub(crate) fn new(collection: Arc<Collection>) -> Self {
        Self {
            collection,
            where_clauses: Vec::new(),
            distinct_where: false,
            descending: false,
            filter: None,
            sort: None,
            distinct: None,
            offset: 0,
            limit: None,
        }
    }

    /// Adds a where clause. Results are the union of all clauses.
    #[must_use]
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    /// Adds an id range clause.
    #[must_use]
    pub fn id_range(self, range: KeyRange) -> Self {
        self.where_clause(WhereClause::IdRange { range })
    }

    /// Adds an index range clause. Build index keys with
    /// [`index_key`](crate::index_key).
    #[must_use]
    pub fn index_range(self, index: impl Into<String>, range: KeyRange) -> Self {
        self.where_clause(WhereClause::IndexRange {
            index: index.into(),
            range,
        })
    }

    /// Adds a link traversal clause.
    ///
    /// Forward traversal (`backlink == false`) yields the targets of the
    /// source record `id`, so `link` must point at this collection.
    /// Backward traversal yields the sources of the target record `id`, so
    /// `link` must originate from this collection.
    #[must_use]
    pub fn link(self, link: &Link, backlink: bool, id: Id) -> Self {
        self.where_clause(WhereClause::Link {
            link: link.clone(),
            backlink,
            id,
        })
    }

    /// Visits only the first record of each distinct index key.
    #[must_use]
    pub fn distinct_where(mut self) -> Self {
        self.distinct_where = true;
        self
    }

    /// Walks where clauses in descending key order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Keeps only records accepted by `filter`.
    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(Id, &Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Sorts results with `compare`.
    #[must_use]
    pub fn sort_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    {
        self.sort = Some(Arc::new(compare));
        self
    }

    /// Keeps the first record for each distinct value of `key`.
    #[must_use]
    pub fn distinct_by<F>(mut self, key: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.distinct = Some(Arc::new(key));
        self
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns at most `limit` results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Validates the clauses and builds the query.
    ///
    /// # Errors
    ///
    /// Returns an error if a clause names an unknown index or a link that
    /// does not connect to this collection.
    pub fn build(self) -> CoreResult<Query> {
        let name = self.collection.name();
        for clause in &self.where_clauses {
            match clause {
                WhereClause::IdRange { .. } => {}
                WhereClause::IndexRange { index, .. } => {
                    if self.collection.schema().index_named(index).is_none() {
                        return Err(CoreError::IndexNotFound {
                            collection: name.to_string(),
                            index: index.clone(),
                        });
                    }
                }
                WhereClause::Link { link, backlink, .. } => {
                    let endpoint = if *backlink { link.source() } else { link.target() };
                    if endpoint != name {
                        return Err(CoreError::invalid_operation(format!(
                            "link '{}' from '{}' to '{}' does not yield records of '{name}'",
                            link.name(),
                            link.source(),
                            link.target()
                        )));
                    }
                }
            }
        }

        let direction = match (self.descending, self.distinct_where) {
            (false, false) => CursorDirection::Next,
            (false, true) => CursorDirection::NextUnique,
            (true, false) => CursorDirection::Prev,
            (true, true) => CursorDirection::PrevUnique,
        };

        Ok(Query {
            collection: self.collection,
            where_clauses: self.where_clauses,
            direction,
            filter: self.filter,
            sort: self.sort,
            distinct: self.distinct,
            offset: self.offset,
            limit: self.limit.unwrap_or(usize::MAX),
        })
    }
}
