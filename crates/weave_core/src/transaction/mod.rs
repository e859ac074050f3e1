//! Transactions over an instance.
//!
//! A [`Txn`] wraps one substrate transaction spanning every store of the
//! instance. Write transactions additionally collect a [`ChangeSet`] per
//! collection; once the substrate reports a successful commit, those change
//! sets are handed to the watchers and broadcast to other instances.
//!
//! Any failed operation aborts a write transaction, so a commit either
//! publishes every mutation made through it or none.

mod change_set;

pub use change_set::{ChangeSet, Changes};

use crate::error::{CoreError, CoreResult};
use crate::instance::InstanceInner;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use weave_storage::{KvTransaction, TransactionState};

/// A transaction over all collections of an instance.
pub struct Txn {
    instance: Arc<InstanceInner>,
    kv: KvTransaction,
    write: bool,
    changes: Mutex<Changes>,
}

impl Txn {
    pub(crate) fn new(instance: Arc<InstanceInner>, kv: KvTransaction, write: bool) -> Self {
        Self {
            instance,
            kv,
            write,
            changes: Mutex::new(Changes::new()),
        }
    }

    /// Returns true for write transactions.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Returns true until the transaction commits or aborts.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.kv.is_active()
    }

    /// Returns the substrate state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.kv.state()
    }

    pub(crate) fn kv(&self) -> &KvTransaction {
        &self.kv
    }

    /// Runs `f`, aborting a write transaction if it fails.
    pub(crate) fn guarded<T>(&self, f: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        let result = f();
        if let Err(e) = &result {
            if self.write && self.kv.is_active() {
                debug!(txn = self.kv.id(), error = %e, "aborting transaction after failure");
                self.kv.abort();
            }
        }
        result
    }

    /// Applies `f` to the change set of `collection`. No-op for read
    /// transactions.
    pub(crate) fn with_change_set(&self, collection: &str, f: impl FnOnce(&mut ChangeSet)) {
        if !self.write {
            return;
        }
        let mut changes = self.changes.lock();
        f(changes.entry(collection.to_string()).or_default());
    }

    /// Commits the transaction.
    ///
    /// For write transactions, watchers are notified once the commit is
    /// durable and the changes are broadcast to other instances.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active or the
    /// database was deleted underneath it.
    pub fn commit(&self) -> CoreResult<()> {
        if !self.kv.is_active() {
            return Err(CoreError::transaction_aborted(format!(
                "transaction {} is {:?}",
                self.kv.id(),
                self.kv.state()
            )));
        }
        self.kv.commit()?;
        if self.write {
            let changes = std::mem::take(&mut *self.changes.lock());
            if changes.values().any(|set| !set.is_empty()) {
                self.instance.notify_watchers(&changes, false);
            }
        }
        Ok(())
    }

    /// Aborts the transaction, discarding its mutations and change sets.
    /// Aborting twice, or after commit, does nothing.
    pub fn abort(&self) {
        if self.kv.is_active() {
            self.kv.abort();
            self.changes.lock().clear();
        }
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.kv.id())
            .field("write", &self.write)
            .field("state", &self.kv.state())
            .finish_non_exhaustive()
    }
}
