//! Error types for the optikv engine.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by [`Store`](crate::Store) operations.
///
/// Every failure is reported to the caller; nothing is retried internally.
/// A failed commit leaves the store consistent: either every staged
/// instruction applied, or none did.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A direct write touched an entry already tombstoned for removal.
    #[error("set failed on key '{key}': zombie key")]
    ZombieKey {
        /// The tombstoned key.
        key: String,
    },

    /// A direct write did not survive its post-publication check; a
    /// concurrent writer overwrote the value immediately.
    #[error("set failed on key '{key}': could not complete")]
    WriteLost {
        /// The contended key.
        key: String,
    },

    /// `open_transaction` was called with an id that is already in use.
    #[error("transaction '{id}' already exists")]
    DuplicateTransaction {
        /// The requested transaction id.
        id: String,
    },

    /// A transaction-scoped operation named an unknown or finished
    /// transaction.
    #[error("no such transaction: '{id}'")]
    NoSuchTransaction {
        /// The offending transaction id.
        id: String,
    },

    /// Commit validation found a touched key changed since its first-touch
    /// snapshot. The transaction is gone; none of its staging applied.
    #[error("transaction '{id}' commits on tampered data: transaction aborted")]
    TransactionConflict {
        /// The aborted transaction id.
        id: String,
    },

    /// Commit could not reach an entry it had located during lock
    /// acquisition. The transaction was torn down.
    #[error("commit of transaction '{id}' failed")]
    CommitFailed {
        /// The torn-down transaction id.
        id: String,
    },
}

impl StoreError {
    /// True for failures that may succeed on retry with fresh data.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::TransactionConflict { .. } | StoreError::WriteLost { .. }
        )
    }

    /// True when the named transaction was unknown or already finished.
    #[must_use]
    pub fn is_missing_transaction(&self) -> bool {
        matches!(self, StoreError::NoSuchTransaction { .. })
    }
}
