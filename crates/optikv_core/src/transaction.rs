//! Transactions and their staged instructions.
//!
//! A transaction is a named batch of instructions keyed by target key. The
//! instruction map shares the entries map's lexicographic ordering: commit
//! walks it front to back to acquire write guards, which gives every commit
//! the same global lock order.

use crate::error::{StoreError, StoreResult};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;

/// What a staged instruction does to its key at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstructionKind {
    /// Publish the staged value.
    Set,
    /// Tombstone and erase the entry.
    Remove,
}

/// A staged mutation against a single key.
#[derive(Debug, Clone)]
pub(crate) struct Instruction {
    /// Target key, redundant with the instruction's key in the transaction
    /// map for convenience.
    pub(crate) key: String,
    /// Snapshot of the live value when this transaction first touched the
    /// key; `None` means the key did not exist then. A retouch never updates
    /// it: this is the conflict baseline for the whole transaction.
    pub(crate) initial_value: Option<String>,
    /// Value to publish for `Set`; retained but unused for `Remove`.
    pub(crate) final_value: Option<String>,
    /// Current effect of the instruction.
    pub(crate) kind: InstructionKind,
}

impl Instruction {
    /// Stages a fresh write.
    pub(crate) fn set(key: &str, initial_value: Option<String>, final_value: String) -> Self {
        Self {
            key: key.to_string(),
            initial_value,
            final_value: Some(final_value),
            kind: InstructionKind::Set,
        }
    }

    /// Retouches the instruction into a write of `value`.
    pub(crate) fn restage_set(&mut self, value: String) {
        self.final_value = Some(value);
        self.kind = InstructionKind::Set;
    }

    /// Retouches the instruction into a removal.
    pub(crate) fn restage_remove(&mut self) {
        self.kind = InstructionKind::Remove;
    }

    /// The value a transactional read observes for this instruction.
    pub(crate) fn staged(&self) -> Option<&str> {
        match self.kind {
            InstructionKind::Set => self.final_value.as_deref(),
            InstructionKind::Remove => None,
        }
    }
}

/// Mutable transaction state, guarded by [`Transaction`]'s mutex.
#[derive(Debug)]
pub(crate) struct TransactionState {
    /// False once the transaction committed, conflicted or rolled back.
    /// Dead transactions reject every operation; commit treats a dead
    /// transaction as already handled and returns quietly.
    pub(crate) alive: bool,
    /// Staged instructions in key order, the global lock order.
    pub(crate) instructions: BTreeMap<String, Instruction>,
}

impl TransactionState {
    fn new() -> Self {
        Self {
            alive: true,
            instructions: BTreeMap::new(),
        }
    }

    /// Fails with [`StoreError::NoSuchTransaction`] once the transaction is
    /// dead.
    pub(crate) fn ensure_alive(&self, id: &str) -> StoreResult<()> {
        if self.alive {
            Ok(())
        } else {
            Err(StoreError::NoSuchTransaction { id: id.to_string() })
        }
    }
}

/// A named, in-flight transaction.
///
/// The mutex serializes every transaction-scoped operation, commit included.
#[derive(Debug)]
pub(crate) struct Transaction {
    state: Mutex<TransactionState>,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TransactionState::new()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_is_alive_and_empty() {
        let txn = Transaction::new();
        let state = txn.lock();
        assert!(state.alive);
        assert!(state.instructions.is_empty());
        assert!(state.ensure_alive("t").is_ok());
    }

    #[test]
    fn restage_set_keeps_the_first_snapshot() {
        let mut instruction = Instruction::set("k", Some("old".to_string()), "v1".to_string());
        instruction.restage_set("v2".to_string());

        assert_eq!(instruction.kind, InstructionKind::Set);
        assert_eq!(instruction.initial_value.as_deref(), Some("old"));
        assert_eq!(instruction.final_value.as_deref(), Some("v2"));
    }

    #[test]
    fn restage_remove_keeps_the_staged_value() {
        let mut instruction = Instruction::set("k", None, "v".to_string());
        instruction.restage_remove();

        assert_eq!(instruction.kind, InstructionKind::Remove);
        assert_eq!(instruction.final_value.as_deref(), Some("v"));
        assert_eq!(instruction.staged(), None);
    }

    #[test]
    fn staged_read_follows_the_kind() {
        let mut instruction = Instruction::set("k", None, "v".to_string());
        assert_eq!(instruction.staged(), Some("v"));

        instruction.restage_remove();
        assert_eq!(instruction.staged(), None);

        instruction.restage_set("w".to_string());
        assert_eq!(instruction.staged(), Some("w"));
    }

    #[test]
    fn dead_state_rejects_operations() {
        let txn = Transaction::new();
        let mut state = txn.lock();
        state.alive = false;

        let err = state.ensure_alive("t9").unwrap_err();
        assert_eq!(err, StoreError::NoSuchTransaction { id: "t9".into() });
    }
}
