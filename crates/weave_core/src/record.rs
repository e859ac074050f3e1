//! Records and their storage encoding.
//!
//! The substrate cannot index `null` or booleans, so records are rewritten
//! before they are stored: `null` becomes the `-inf` float sentinel (which
//! sorts before every other number) and booleans become `1` / `0`. Decoding
//! reverses this with the help of the schema's boolean properties.

use crate::error::{CoreError, CoreResult};
use crate::schema::CollectionSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use weave_codec::Value;
use weave_storage::{Key, StorageError};

/// Record identifier, unique within a collection.
pub type Id = i64;

/// Largest id magnitude that survives the float key encoding exactly.
pub const MAX_SAFE_ID: Id = (1 << 53) - 1;

/// Rejects ids that would be rounded when turned into a storage key.
pub(crate) fn check_id(id: Id) -> CoreResult<()> {
    if !(-MAX_SAFE_ID..=MAX_SAFE_ID).contains(&id) {
        return Err(StorageError::invalid_key(format!(
            "id {id} is outside the exactly representable range ±{MAX_SAFE_ID}"
        ))
        .into());
    }
    Ok(())
}

/// A document in a collection.
///
/// The identity key lives in [`id`](Self::id) and never inside
/// [`fields`](Self::fields). A record without an id gets one assigned by
/// [`Collection::put_all`](crate::Collection::put_all).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Identity key, `None` for records not yet stored.
    pub id: Option<Id>,
    /// Property values by name.
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record without an id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty record with the given id.
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        Self {
            id: Some(id),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Builds a record from a map value, taking the id from `id_name`.
    ///
    /// A missing or null id leaves the record without one.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a map with text keys or the id is
    /// not an integer.
    pub fn from_value(value: Value, id_name: &str) -> CoreResult<Self> {
        let Value::Map(pairs) = value else {
            return Err(CoreError::invalid_operation("a record must be a map"));
        };
        let mut record = Record::new();
        for (key, value) in pairs {
            let Value::Text(name) = key else {
                return Err(CoreError::invalid_operation("record keys must be text"));
            };
            if name == id_name {
                record.id = match value {
                    Value::Null => None,
                    Value::Integer(id) => Some(id),
                    _ => return Err(CoreError::invalid_operation("record id must be an integer")),
                };
            } else {
                record.fields.insert(name, value);
            }
        }
        Ok(record)
    }

    /// Converts the record into a map value carrying the id under `id_name`.
    #[must_use]
    pub fn to_value(&self, id_name: &str) -> Value {
        let id = self.id.map_or(Value::Null, Value::Integer);
        Value::object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .chain(std::iter::once((id_name.to_string(), id))),
        )
    }

    /// Builds a record from any serializable struct.
    ///
    /// # Errors
    ///
    /// Returns an error if the struct does not serialize to a map.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T, id_name: &str) -> CoreResult<Self> {
        Self::from_value(weave_codec::to_value(value)?, id_name)
    }

    /// Converts the record into any deserializable struct.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not match the shape of `T`.
    pub fn to_serde<T: DeserializeOwned>(&self, id_name: &str) -> CoreResult<T> {
        Ok(weave_codec::from_value(&self.to_value(id_name))?)
    }
}

/// Converts a caller-supplied value into an index key, applying the same
/// rewriting as stored records.
///
/// # Errors
///
/// Returns an error for values that cannot be keys (maps).
pub fn index_key(value: &Value) -> CoreResult<Key> {
    Key::from_value(&encode_value(value))
        .ok_or_else(|| CoreError::invalid_operation(format!("{value:?} is not a valid index key")))
}

/// Rewrites one value for storage.
pub(crate) fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Float(f64::NEG_INFINITY),
        Value::Float(f) if f.is_nan() => Value::Float(f64::NEG_INFINITY),
        Value::Bool(b) => Value::Integer(i64::from(*b)),
        Value::Array(items) => Value::Array(items.iter().map(encode_value).collect()),
        other => other.clone(),
    }
}

fn is_null_sentinel(value: &Value) -> bool {
    matches!(value, Value::Float(f) if *f == f64::NEG_INFINITY)
}

/// Schema-driven record encoder and decoder for one collection.
#[derive(Debug, Clone)]
pub(crate) struct RecordCodec {
    bool_properties: HashSet<String>,
}

impl RecordCodec {
    pub(crate) fn new(schema: &CollectionSchema) -> Self {
        Self {
            bool_properties: schema.bool_properties().into_iter().collect(),
        }
    }

    /// Encodes a record's fields into the stored map (without the id).
    pub(crate) fn encode(&self, record: &Record) -> Value {
        Value::object(
            record
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), encode_value(value))),
        )
    }

    /// Decodes a stored map back into a record with the given id.
    pub(crate) fn decode(&self, id: Id, stored: &Value) -> Record {
        let mut record = Record::with_id(id);
        let Some(pairs) = stored.as_map() else {
            return record;
        };
        for (key, value) in pairs {
            let Some(name) = key.as_text() else {
                continue;
            };
            let is_bool = self.bool_properties.contains(name);
            let decoded = match value {
                v if is_null_sentinel(v) => Value::Null,
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| decode_element(item, is_bool))
                        .collect(),
                ),
                v if is_bool => Value::Bool(v.as_number() == Some(1.0)),
                v => v.clone(),
            };
            record.fields.insert(name.to_string(), decoded);
        }
        record
    }
}

fn decode_element(item: &Value, is_bool: bool) -> Value {
    if is_null_sentinel(item) {
        Value::Null
    } else if is_bool {
        Value::Bool(item.as_number().is_some_and(|n| n > 0.0))
    } else {
        item.clone()
    }
}
