//! # WeaveDB Testkit
//!
//! Test utilities for WeaveDB.
//!
//! This crate provides:
//! - Isolated test instances and canned schemas
//! - Record builders from `serde_json` literals
//! - Property-based test generators using proptest
//! - Recorders for watcher callbacks
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use weave_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_instance() {
//!     with_test_instance(|db| {
//!         let users = db.collection("users").unwrap();
//!         db.write_txn(|txn| users.put_all(txn, vec![record!({"name": "Ada", "age": 36})]))
//!             .unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod json;
pub mod recorder;

#[doc(hidden)]
pub use serde_json;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::json::*;
    pub use crate::record;
    pub use crate::recorder::*;
}

pub use fixtures::*;
pub use generators::*;
pub use json::*;
pub use recorder::*;
