//! Property-based test generators using proptest.
//!
//! Strategies produce records that fit [`users_schema`](crate::users_schema)
//! and operation sequences for model-checking collections.

use proptest::prelude::*;
use weave_codec::Value;
use weave_core::{Id, Record};

/// Strategy for record ids in a small range, so sequences collide often.
pub fn id_strategy() -> impl Strategy<Value = Id> {
    1i64..64
}

/// Strategy for user names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for tag lists, possibly with duplicates.
pub fn tags_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::string::string_regex("[a-d]").expect("Invalid regex"),
        0..4,
    )
}

/// Strategy for records matching the `users` schema, without an id.
pub fn user_strategy() -> impl Strategy<Value = Record> {
    (
        name_strategy(),
        0i64..100,
        any::<bool>(),
        tags_strategy(),
    )
        .prop_map(|(name, age, active, tags)| {
            Record::new()
                .set("name", name)
                .set("age", age)
                .set("active", active)
                .set(
                    "tags",
                    Value::Array(tags.into_iter().map(Value::Text).collect()),
                )
        })
}

/// Strategy for scalar values usable as index keys.
pub fn key_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| Value::Integer(i64::from(n))),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        name_strategy().prop_map(Value::Text),
    ]
}

/// A collection operation for model checking.
#[derive(Debug, Clone)]
pub enum CollectionOperation {
    /// Put a record under an id
    Put {
        /// Record id
        id: Id,
        /// Record fields
        record: Record,
    },
    /// Delete a record
    Delete {
        /// Record id
        id: Id,
    },
    /// Clear the collection
    Clear,
}

/// Strategy for collection operations.
pub fn collection_operation_strategy() -> impl Strategy<Value = CollectionOperation> {
    prop_oneof![
        6 => (id_strategy(), user_strategy())
            .prop_map(|(id, record)| CollectionOperation::Put { id, record }),
        3 => id_strategy().prop_map(|id| CollectionOperation::Delete { id }),
        1 => Just(CollectionOperation::Clear),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<CollectionOperation>> {
    prop::collection::vec(collection_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
