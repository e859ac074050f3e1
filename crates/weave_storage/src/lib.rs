//! # WeaveDB Storage
//!
//! The ordered key-value substrate WeaveDB documents live in.
//!
//! A [`KvEnv`] holds named databases. Each database carries a schema version
//! and a set of object stores; each store is an ordered map from [`Key`] to
//! record [`Value`](weave_codec::Value), optionally with secondary indexes
//! (unique and/or multi-entry).
//!
//! ## Design Principles
//!
//! - Writers are serialized, readers work on snapshots
//! - Writes are copy-on-write per store and published atomically on commit
//! - Schema changes happen only inside a version-change transaction
//! - The substrate knows nothing about documents, links or watchers
//!
//! ## Example
//!
//! ```rust
//! use weave_storage::{Durability, Key, KeyRange, KvEnv, StoreOptions, TransactionMode};
//! use weave_codec::Value;
//!
//! let env = KvEnv::new();
//! let db = env.open("demo");
//!
//! let upgrade = db.upgrade(0, 1).unwrap();
//! upgrade.create_store("notes", StoreOptions::default()).unwrap();
//! upgrade.commit().unwrap();
//!
//! let txn = db
//!     .transaction(["notes"], TransactionMode::ReadWrite, Durability::Default)
//!     .unwrap();
//! txn.put("notes", Value::from("hello"), Some(Key::from(1))).unwrap();
//! txn.commit().unwrap();
//!
//! let txn = db
//!     .transaction(["notes"], TransactionMode::ReadOnly, Durability::Default)
//!     .unwrap();
//! assert_eq!(txn.count("notes", &KeyRange::all()).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod env;
mod error;
mod key;
mod store;
mod transaction;

pub use cursor::{Cursor, CursorDirection, CursorEntry};
pub use env::{KvDatabase, KvEnv};
pub use error::{StorageError, StorageResult};
pub use key::{Key, KeyPath, KeyRange};
pub use store::{IndexInfo, StoreOptions};
pub use transaction::{Durability, KvTransaction, TransactionMode, TransactionState};
