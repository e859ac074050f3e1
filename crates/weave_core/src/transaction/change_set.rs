//! Per-collection change tracking.

use crate::error::{CoreError, CoreResult};
use crate::record::{Id, Record};
use std::collections::{BTreeMap, BTreeSet};
use weave_codec::Value;

/// Net effect of one write transaction on one collection.
///
/// An id is never in both `added` and `deleted`: the last registration for
/// an id wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    cleared: bool,
    added: BTreeMap<Id, Record>,
    deleted: BTreeSet<Id>,
}

/// Change sets of one commit, by collection name.
pub type Changes = BTreeMap<String, ChangeSet>;

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a put (`Some`) or a delete (`None`) of `id`.
    pub fn register_change(&mut self, id: Id, record: Option<Record>) {
        match record {
            Some(record) => {
                self.deleted.remove(&id);
                self.added.insert(id, record);
            }
            None => {
                self.added.remove(&id);
                self.deleted.insert(id);
            }
        }
    }

    /// Records that the collection was cleared. Earlier changes are dropped.
    pub fn register_cleared(&mut self) {
        self.added.clear();
        self.deleted.clear();
        self.cleared = true;
    }

    /// Returns true if the collection was cleared.
    #[must_use]
    pub fn cleared(&self) -> bool {
        self.cleared
    }

    /// Records written, by id.
    #[must_use]
    pub fn added(&self) -> &BTreeMap<Id, Record> {
        &self.added
    }

    /// Ids deleted.
    #[must_use]
    pub fn deleted(&self) -> &BTreeSet<Id> {
        &self.deleted
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.added.is_empty() && self.deleted.is_empty()
    }

    /// Wire form used by the broadcast channel.
    pub(crate) fn to_value(&self) -> Value {
        let added = self
            .added
            .iter()
            .map(|(id, record)| {
                let fields = Value::object(
                    record.fields.iter().map(|(k, v)| (k.clone(), v.clone())),
                );
                Value::Array(vec![Value::Integer(*id), fields])
            })
            .collect();
        let deleted = self.deleted.iter().map(|id| Value::Integer(*id)).collect();
        Value::object([
            ("cleared", Value::Bool(self.cleared)),
            ("added", Value::Array(added)),
            ("deleted", Value::Array(deleted)),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> CoreResult<Self> {
        let malformed = || CoreError::invalid_operation("malformed change set");
        let mut set = ChangeSet {
            cleared: value
                .get("cleared")
                .and_then(Value::as_bool)
                .ok_or_else(malformed)?,
            ..ChangeSet::default()
        };
        for entry in value.get("added").and_then(Value::as_array).ok_or_else(malformed)? {
            let [id, fields] = entry.as_array().ok_or_else(malformed)? else {
                return Err(malformed());
            };
            let id = id.as_integer().ok_or_else(malformed)?;
            let mut record = Record::from_value(fields.clone(), "")?;
            record.id = Some(id);
            set.added.insert(id, record);
        }
        for id in value.get("deleted").and_then(Value::as_array).ok_or_else(malformed)? {
            set.deleted.insert(id.as_integer().ok_or_else(malformed)?);
        }
        Ok(set)
    }
}
