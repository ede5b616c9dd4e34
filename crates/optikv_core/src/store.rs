//! The store facade and the commit protocol.
//!
//! `Store` owns two maps: live entries keyed by string, ordered because the
//! entry order doubles as the global lock-acquisition order, and open
//! transactions keyed by caller-chosen id. Direct operations publish through
//! a per-entry guard pair; transaction-scoped operations stage instructions
//! under the transaction's own mutex and apply them atomically at commit.
//!
//! ## Commit sequence
//!
//! ```text
//! 1. Look up the transaction, take its mutex, re-check liveness
//! 2. Acquire per-entry write guards in ascending key order
//! 3. Validate every staged snapshot against the live value
//! 4. If all validate, apply every instruction (removals tombstone)
//! 5. Release guards in descending key order, erasing tombstones
//! 6. Unmap the transaction; report success or conflict
//! ```
//!
//! ## Lock hierarchy
//!
//! Transaction mutex, then the maps, then entry guards. The map locks are
//! only ever held for short sections that never block on an entry guard;
//! entry guards are only acquired with no map lock held (look up, clone the
//! `Arc`, drop the map lock, lock). That is why commit may take a map write
//! lock while holding entry guards without risking a cycle.

use crate::entry::{Entry, WriteGuard};
use crate::error::{StoreError, StoreResult};
use crate::transaction::{Instruction, InstructionKind, Transaction, TransactionState};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// An entry the commit protocol holds the write guard for.
struct LockedEntry {
    entry: Arc<Entry>,
    _guard: WriteGuard,
}

/// An alive, guarded entry turned out not to be the map's current binding.
struct EntryUnreachable;

/// The in-memory store: live entries plus open transactions.
///
/// A single `Store` is shared across threads (typically behind an `Arc`);
/// every operation takes `&self` and is thread-safe. The store exclusively
/// owns its entries and transactions; values handed to callers are always
/// owned copies.
pub struct Store {
    /// Live entries. Lexicographic key order; commit acquires write guards
    /// in this order, which is the sole deadlock-avoidance mechanism.
    entries: RwLock<BTreeMap<String, Arc<Entry>>>,
    /// Open transactions by caller-chosen id.
    transactions: RwLock<HashMap<String, Arc<Transaction>>>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // === Direct (auto-commit) operations ===

    /// Sets `key` to `value`, creating the entry if needed.
    ///
    /// # Errors
    ///
    /// [`StoreError::ZombieKey`] if the entry is tombstoned for removal, and
    /// [`StoreError::WriteLost`] if the published value does not survive the
    /// post-publication check, which happens only when a concurrent writer
    /// overwrites it immediately.
    pub fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let existing = self.entries.read().get(key).cloned();
        let entry = match existing {
            Some(entry) => {
                if !entry.is_alive() {
                    return Err(StoreError::ZombieKey {
                        key: key.to_string(),
                    });
                }
                {
                    // write guard first, then the value lock inside publish;
                    // every writer takes the pair in this order
                    let _write = entry.lock_write();
                    if !entry.is_alive() {
                        // tombstoned while we waited for the guard
                        return Err(StoreError::ZombieKey {
                            key: key.to_string(),
                        });
                    }
                    entry.publish(value);
                }
                entry
            }
            None => {
                // A fresh entry needs no guards before insertion: it is not
                // reachable until the map lock drops. If the vacancy was
                // lost to a concurrent creator the incumbent stays and the
                // check below reports the mismatch.
                let mut entries = self.entries.write();
                Arc::clone(
                    entries
                        .entry(key.to_string())
                        .or_insert_with(|| Arc::new(Entry::new(value))),
                )
            }
        };

        let _write = entry.lock_write();
        if !entry.value_matches(value) {
            return Err(StoreError::WriteLost {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Returns an owned copy of the value at `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.read().get(key).cloned()?;
        if !entry.is_alive() {
            return None;
        }
        Some(entry.read_value())
    }

    /// Removes `key`. Removing an absent or already-tombstoned key is a
    /// no-op, not an error.
    pub fn remove(&self, key: &str) {
        let Some(entry) = self.entries.read().get(key).cloned() else {
            return;
        };
        if !entry.is_alive() {
            return;
        }
        {
            let _write = entry.lock_write();
            if !entry.is_alive() {
                // another remover won; it also erases the binding
                return;
            }
            entry.kill();
        }
        // Guards are released before the erase. alive=false keeps new
        // acquirers away, and a tombstoned binding is never replaced until
        // it is erased, so the binding is still ours.
        self.entries.write().remove(key);
    }

    // === Transaction lifecycle ===

    /// Opens an empty transaction under `id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateTransaction`] if `id` is already in use.
    pub fn open_transaction(&self, id: &str) -> StoreResult<()> {
        let mut transactions = self.transactions.write();
        if transactions.contains_key(id) {
            return Err(StoreError::DuplicateTransaction { id: id.to_string() });
        }
        transactions.insert(id.to_string(), Arc::new(Transaction::new()));
        trace!(transaction = %id, "transaction opened");
        Ok(())
    }

    /// Discards the transaction and everything it staged.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoSuchTransaction`] if `id` is unknown or the
    /// transaction already finished.
    pub fn rollback_transaction(&self, id: &str) -> StoreResult<()> {
        let txn = self.lookup_transaction(id)?;
        let mut state = txn.lock();
        state.ensure_alive(id)?;
        self.discard_transaction(id, &txn, &mut state);
        trace!(transaction = %id, "transaction rolled back");
        Ok(())
    }

    // === Transaction-scoped operations ===

    /// Stages `key = value` in the named transaction.
    ///
    /// The first touch of a key snapshots its current live value as the
    /// conflict baseline; retouching the same key updates only the staged
    /// value, never the snapshot.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoSuchTransaction`] if `id` is unknown or dead.
    pub fn set_in(&self, id: &str, key: &str, value: &str) -> StoreResult<()> {
        let txn = self.lookup_transaction(id)?;
        let mut state = txn.lock();
        state.ensure_alive(id)?;

        if let Some(instruction) = state.instructions.get_mut(key) {
            instruction.restage_set(value.to_string());
        } else {
            let snapshot = self.snapshot_value(key);
            state.instructions.insert(
                key.to_string(),
                Instruction::set(key, snapshot, value.to_string()),
            );
        }
        Ok(())
    }

    /// Stages the removal of `key` in the named transaction.
    ///
    /// Removing a key the transaction has not touched stages nothing: such a
    /// removal has no snapshot to validate against, so it is vacuous.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoSuchTransaction`] if `id` is unknown or dead.
    pub fn remove_in(&self, id: &str, key: &str) -> StoreResult<()> {
        let txn = self.lookup_transaction(id)?;
        let mut state = txn.lock();
        state.ensure_alive(id)?;

        if let Some(instruction) = state.instructions.get_mut(key) {
            instruction.restage_remove();
        }
        Ok(())
    }

    /// Reads `key` as the named transaction sees it: the staged value if the
    /// transaction touched the key (absent for a staged removal), otherwise
    /// the live value.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoSuchTransaction`] if `id` is unknown or dead.
    pub fn get_in(&self, id: &str, key: &str) -> StoreResult<Option<String>> {
        let txn = self.lookup_transaction(id)?;
        let state = txn.lock();
        state.ensure_alive(id)?;

        if let Some(instruction) = state.instructions.get(key) {
            return Ok(instruction.staged().map(|value| value.to_string()));
        }
        Ok(self.get(key))
    }

    /// Commits the named transaction: every staged instruction applies to a
    /// data snapshot unchanged since that key's first touch, or none do.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoSuchTransaction`] if `id` is unknown.
    /// [`StoreError::TransactionConflict`] if any touched key changed since
    /// its first-touch snapshot; the transaction is gone and nothing it
    /// staged applied. [`StoreError::CommitFailed`] if an entry located
    /// during lock acquisition turned unreachable; the transaction is torn
    /// down.
    ///
    /// Committing a transaction that a concurrent rollback (or a concurrent
    /// commit of the same id) already finished returns quietly.
    pub fn commit_transaction(&self, id: &str) -> StoreResult<()> {
        let txn = self.lookup_transaction(id)?;
        let mut state = txn.lock();
        if !state.alive {
            // lost the race against a concurrent rollback or commit on this
            // id; the transaction is already handled
            trace!(transaction = %id, "commit of finished transaction ignored");
            return Ok(());
        }

        // Phase 1: acquire write guards in ascending key order. Instruction
        // order equals entry order, so overlapping commits always contend in
        // the same order and cannot deadlock.
        let keys: Vec<String> = state.instructions.keys().cloned().collect();
        let mut held: Vec<Option<LockedEntry>> = Vec::with_capacity(keys.len());
        let mut unreachable = false;
        for key in &keys {
            match self.acquire_for_commit(key) {
                Ok(slot) => held.push(slot),
                Err(EntryUnreachable) => {
                    unreachable = true;
                    break;
                }
            }
        }
        if unreachable {
            // release whatever was acquired, newest first, and tear down
            while held.pop().is_some() {}
            self.discard_transaction(id, &txn, &mut state);
            error!(transaction = %id, "entry unreachable during lock acquisition");
            return Err(StoreError::CommitFailed { id: id.to_string() });
        }

        // Phase 2: validate every snapshot against the live value. A guarded
        // key cannot change under us; a key with no guard was absent or dead
        // at acquisition and validates as such.
        let mut conflicted = false;
        for (instruction, slot) in state.instructions.values().zip(held.iter()) {
            let clean = match (&instruction.initial_value, slot) {
                // the key is still absent; commit may create it
                (None, None) => true,
                (Some(initial), Some(locked)) => locked.entry.value_matches(initial),
                // created elsewhere since first touch
                (None, Some(_)) => false,
                // removed elsewhere since first touch
                (Some(_), None) => false,
            };
            if !clean {
                conflicted = true;
                break;
            }
        }

        // Phase 3: apply. Reached only with every snapshot validated, so a
        // failed commit leaves no mutation behind.
        if !conflicted {
            for (instruction, slot) in state.instructions.values().zip(held.iter()) {
                match instruction.kind {
                    InstructionKind::Set => match (slot, &instruction.final_value) {
                        (Some(locked), Some(value)) => locked.entry.publish(value),
                        (None, Some(value)) => {
                            // The key validated as absent. On a lost creation
                            // race the incumbent stays; there is no guard on
                            // an entry that did not exist at acquisition.
                            self.entries
                                .write()
                                .entry(instruction.key.clone())
                                .or_insert_with(|| Arc::new(Entry::new(value.clone())));
                        }
                        (_, None) => {}
                    },
                    InstructionKind::Remove => {
                        // A removal only validates with its guard held; a
                        // staged removal of a never-created key has nothing
                        // to do.
                        if let Some(locked) = slot {
                            locked.entry.kill();
                        }
                    }
                }
            }
        }

        // Phase 4: release guards in descending key order, erasing each
        // tombstone after its guard is released. No guard is destroyed while
        // held, and alive=false keeps new acquirers away from the doomed
        // binding in the gap.
        let mut instructions = state.instructions.values().rev();
        while let Some(slot) = held.pop() {
            let instruction = instructions.next();
            if let (Some(locked), Some(instruction)) = (slot, instruction) {
                let tombstoned =
                    !conflicted && matches!(instruction.kind, InstructionKind::Remove);
                drop(locked);
                if tombstoned {
                    self.entries.write().remove(&instruction.key);
                }
            }
        }

        self.discard_transaction(id, &txn, &mut state);
        if conflicted {
            debug!(transaction = %id, "commit aborted on snapshot mismatch");
            Err(StoreError::TransactionConflict { id: id.to_string() })
        } else {
            debug!(transaction = %id, instructions = keys.len(), "transaction committed");
            Ok(())
        }
    }

    // === Introspection ===

    /// Number of entries currently in the store.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.read().len()
    }

    // === Internals ===

    fn lookup_transaction(&self, id: &str) -> StoreResult<Arc<Transaction>> {
        self.transactions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchTransaction { id: id.to_string() })
    }

    /// First-touch snapshot of a key's live value.
    ///
    /// Captured without the entry's write guard: a concurrent writer may
    /// publish between this read and commit validation, and the commit then
    /// reports that as a conflict. That window is part of the isolation
    /// contract, not a defect.
    fn snapshot_value(&self, key: &str) -> Option<String> {
        let entry = self.entries.read().get(key).cloned()?;
        if !entry.is_alive() {
            return None;
        }
        Some(entry.read_value())
    }

    /// Marks the transaction dead and unmaps it.
    ///
    /// Runs under the transaction's own mutex, so staging calls blocked on
    /// that mutex observe the death instead of writing into an unmapped
    /// transaction. The unmap is identity-checked: the id may already name a
    /// newer transaction.
    fn discard_transaction(
        &self,
        id: &str,
        txn: &Arc<Transaction>,
        state: &mut TransactionState,
    ) {
        state.alive = false;
        let mut transactions = self.transactions.write();
        if transactions
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, txn))
        {
            transactions.remove(id);
        }
    }

    /// Takes the write guard of the entry at `key` for commit.
    ///
    /// Returns `None` when the key is absent or tombstoned; such keys have
    /// nothing to lock and validate as not-alive. An entry that dies while
    /// we wait on its guard is released and the key probed again, since its
    /// finalizer is concurrently erasing the binding. An entry that is alive
    /// under its guard yet no longer the map's binding should not exist;
    /// that is the unrecoverable arm.
    fn acquire_for_commit(&self, key: &str) -> Result<Option<LockedEntry>, EntryUnreachable> {
        loop {
            let Some(entry) = self.entries.read().get(key).cloned() else {
                return Ok(None);
            };
            if !entry.is_alive() {
                // tombstone: no new acquisitions
                return Ok(None);
            }
            let guard = entry.lock_write_owned();
            if !entry.is_alive() {
                drop(guard);
                continue;
            }
            let entries = self.entries.read();
            if entries
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &entry))
            {
                drop(entries);
                return Ok(Some(LockedEntry {
                    entry,
                    _guard: guard,
                }));
            }
            return Err(EntryUnreachable);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            transactions: RwLock::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("entries", &self.entry_count())
            .field("transactions", &self.transaction_count())
            .finish_non_exhaustive()
    }
}
