//! # WeaveDB Core
//!
//! Document collections over the WeaveDB key-value substrate.
//!
//! This crate provides:
//! - Collection schemas with secondary indexes and links between collections
//! - Record CRUD with cascading link cleanup
//! - Transactions that collect per-collection change sets
//! - A query engine over id ranges, index ranges and link traversals
//! - Collection, object and live-query watchers
//! - Automatic layout migration when schemas change
//! - Change broadcast between instances of the same database
//!
//! ## Usage
//!
//! ```rust,ignore
//! use weave_core::{CollectionSchema, Config, IndexSchema, IndexType, Instance, PropertyType, Record};
//! use weave_core::{Key, KeyRange};
//!
//! let users = CollectionSchema::new("users")
//!     .property("name", PropertyType::String)
//!     .property("age", PropertyType::Int)
//!     .index(IndexSchema::new("age").property("age", IndexType::Value));
//!
//! let db = Instance::open("app", vec![users], Config::default())?;
//! let users = db.collection("users")?;
//!
//! let adults = users
//!     .query()
//!     .index_range("age", KeyRange::lower_bound(Key::from(18), false))
//!     .build()?;
//! let _watch = adults.watch(|records| println!("{} adults", records.len()));
//!
//! db.write_txn(|txn| users.put_all(txn, vec![Record::new().set("name", "Ada").set("age", 36)]))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broadcast;
mod collection;
mod config;
mod error;
mod instance;
mod link;
mod migration;
mod query;
mod record;
pub mod schema;
mod transaction;
mod watch;

pub use broadcast::{BroadcastHub, ChangeMessage, DEFAULT_QUEUE_CAPACITY};
pub use collection::Collection;
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use instance::Instance;
pub use link::Link;
pub use migration::MigrationOperation;
pub use query::{Comparator, DistinctBy, Filter, Query, QueryBuilder, WhereClause};
pub use record::{index_key, Id, Record, MAX_SAFE_ID};
pub use schema::{
    verify_schemas, CollectionSchema, IndexPropertySchema, IndexSchema, IndexType, LinkSchema,
    PropertySchema, PropertyType,
};
pub use transaction::{ChangeSet, Changes, Txn};
pub use watch::{ChangeCallback, ObjectCallback, QueryCallback, StopWatching};

pub use weave_codec::Value;
pub use weave_storage::{Key, KeyRange, KvEnv, StorageError, TransactionState};
