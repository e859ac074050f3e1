//! Error types for WeaveDB core.

use thiserror::Error;
use weave_storage::StorageError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in WeaveDB core operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Storage substrate error. Unique-index conflicts and duplicate link
    /// pairs surface here as [`StorageError::Constraint`].
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] weave_codec::CodecError),

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// Index not found on a collection.
    #[error("index '{index}' not found in collection '{collection}'")]
    IndexNotFound {
        /// Collection searched.
        collection: String,
        /// Name of the index.
        index: String,
    },

    /// Link not found on a collection.
    #[error("link '{link}' not found in collection '{collection}'")]
    LinkNotFound {
        /// Collection searched.
        collection: String,
        /// Name of the link.
        link: String,
    },

    /// The supplied schema is invalid.
    #[error("invalid schema: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// The persisted layout could not be reconciled with the schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the conflict.
        message: String,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The instance was closed.
    #[error("instance is closed")]
    InstanceClosed,
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Returns true for integrity violations (unique conflicts, duplicate
    /// link pairs).
    #[must_use]
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Constraint { .. }))
    }
}
