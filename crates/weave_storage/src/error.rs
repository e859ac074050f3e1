//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A write would break a uniqueness rule (duplicate key or unique index).
    #[error("constraint violated in store '{store}': {message}")]
    Constraint {
        /// The store the write targeted.
        store: String,
        /// What was violated.
        message: String,
    },

    /// The named object store does not exist.
    #[error("object store '{name}' not found")]
    StoreNotFound {
        /// Store name.
        name: String,
    },

    /// The named index does not exist on the store.
    #[error("index '{index}' not found on store '{store}'")]
    IndexNotFound {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },

    /// The transaction has already committed or aborted.
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The store is not part of the transaction scope.
    #[error("store '{store}' is not in the transaction scope")]
    NotInScope {
        /// Store name.
        store: String,
    },

    /// A schema change was attempted outside a version-change transaction.
    #[error("operation requires a version-change transaction")]
    NotVersionChange,

    /// The database version moved while an upgrade was being prepared.
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// The version the caller based the upgrade on.
        expected: u32,
        /// The version actually stored.
        actual: u32,
    },

    /// A key could not be derived or is not a valid key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// The database handle was closed or the database was deleted.
    #[error("database is closed")]
    Closed,
}

impl StorageError {
    /// Creates a constraint error.
    pub fn constraint(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a store-not-found error.
    pub fn store_not_found(name: impl Into<String>) -> Self {
        Self::StoreNotFound { name: name.into() }
    }
}
