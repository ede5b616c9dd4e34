//! Model-based checking against a sequential oracle.
//!
//! The oracle re-implements the engine's visible single-threaded semantics
//! over plain maps: live values, per-transaction staging with first-touch
//! snapshots, and commit-time snapshot validation. Scripted sequences run
//! against engine and oracle in lockstep and any divergence is reported.

use optikv_core::{Store, StoreError, StoreResult};
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};

/// One scripted engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOp {
    /// Direct write.
    Set {
        /// Target key.
        key: String,
        /// Value to publish.
        value: String,
    },
    /// Direct read.
    Get {
        /// Target key.
        key: String,
    },
    /// Direct removal.
    Remove {
        /// Target key.
        key: String,
    },
    /// Open a named transaction.
    Open {
        /// Transaction id.
        id: String,
    },
    /// Transaction-scoped write.
    SetIn {
        /// Transaction id.
        id: String,
        /// Target key.
        key: String,
        /// Value to stage.
        value: String,
    },
    /// Transaction-scoped read.
    GetIn {
        /// Transaction id.
        id: String,
        /// Target key.
        key: String,
    },
    /// Transaction-scoped removal.
    RemoveIn {
        /// Transaction id.
        id: String,
        /// Target key.
        key: String,
    },
    /// Roll the named transaction back.
    Rollback {
        /// Transaction id.
        id: String,
    },
    /// Commit the named transaction.
    Commit {
        /// Transaction id.
        id: String,
    },
}

/// Observable outcome of one operation, engine and oracle alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed.
    Done,
    /// A read returned this value.
    Read(Option<String>),
    /// The operation failed with this error class.
    Fault(&'static str),
}

fn classify(error: &StoreError) -> &'static str {
    match error {
        StoreError::ZombieKey { .. } => "zombie-key",
        StoreError::WriteLost { .. } => "write-lost",
        StoreError::DuplicateTransaction { .. } => "duplicate-transaction",
        StoreError::NoSuchTransaction { .. } => "no-such-transaction",
        StoreError::TransactionConflict { .. } => "transaction-conflict",
        StoreError::CommitFailed { .. } => "commit-failed",
    }
}

fn outcome_of(result: StoreResult<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Done,
        Err(error) => Outcome::Fault(classify(&error)),
    }
}

/// Runs one operation against the engine.
pub fn run_engine_op(store: &Store, op: &ModelOp) -> Outcome {
    match op {
        ModelOp::Set { key, value } => outcome_of(store.set(key, value)),
        ModelOp::Get { key } => Outcome::Read(store.get(key)),
        ModelOp::Remove { key } => {
            store.remove(key);
            Outcome::Done
        }
        ModelOp::Open { id } => outcome_of(store.open_transaction(id)),
        ModelOp::SetIn { id, key, value } => outcome_of(store.set_in(id, key, value)),
        ModelOp::GetIn { id, key } => match store.get_in(id, key) {
            Ok(value) => Outcome::Read(value),
            Err(error) => Outcome::Fault(classify(&error)),
        },
        ModelOp::RemoveIn { id, key } => outcome_of(store.remove_in(id, key)),
        ModelOp::Rollback { id } => outcome_of(store.rollback_transaction(id)),
        ModelOp::Commit { id } => outcome_of(store.commit_transaction(id)),
    }
}

/// A staged mutation inside the oracle; `value: None` stages a removal.
#[derive(Debug, Clone)]
struct Staged {
    snapshot: Option<String>,
    value: Option<String>,
}

/// Sequential oracle mirroring the engine's visible semantics.
#[derive(Debug, Default)]
pub struct Oracle {
    live: BTreeMap<String, String>,
    transactions: HashMap<String, BTreeMap<String, Staged>>,
}

impl Oracle {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one operation against the oracle.
    pub fn run_op(&mut self, op: &ModelOp) -> Outcome {
        match op {
            ModelOp::Set { key, value } => {
                self.live.insert(key.clone(), value.clone());
                Outcome::Done
            }
            ModelOp::Get { key } => Outcome::Read(self.live.get(key).cloned()),
            ModelOp::Remove { key } => {
                self.live.remove(key);
                Outcome::Done
            }
            ModelOp::Open { id } => {
                if self.transactions.contains_key(id) {
                    Outcome::Fault("duplicate-transaction")
                } else {
                    self.transactions.insert(id.clone(), BTreeMap::new());
                    Outcome::Done
                }
            }
            ModelOp::SetIn { id, key, value } => {
                let Some(txn) = self.transactions.get_mut(id) else {
                    return Outcome::Fault("no-such-transaction");
                };
                match txn.get_mut(key) {
                    Some(staged) => staged.value = Some(value.clone()),
                    None => {
                        let snapshot = self.live.get(key).cloned();
                        txn.insert(
                            key.clone(),
                            Staged {
                                snapshot,
                                value: Some(value.clone()),
                            },
                        );
                    }
                }
                Outcome::Done
            }
            ModelOp::GetIn { id, key } => {
                let Some(txn) = self.transactions.get(id) else {
                    return Outcome::Fault("no-such-transaction");
                };
                match txn.get(key) {
                    Some(staged) => Outcome::Read(staged.value.clone()),
                    None => Outcome::Read(self.live.get(key).cloned()),
                }
            }
            ModelOp::RemoveIn { id, key } => {
                let Some(txn) = self.transactions.get_mut(id) else {
                    return Outcome::Fault("no-such-transaction");
                };
                // untouched keys stage nothing
                if let Some(staged) = txn.get_mut(key) {
                    staged.value = None;
                }
                Outcome::Done
            }
            ModelOp::Rollback { id } => {
                if self.transactions.remove(id).is_some() {
                    Outcome::Done
                } else {
                    Outcome::Fault("no-such-transaction")
                }
            }
            ModelOp::Commit { id } => {
                let Some(txn) = self.transactions.remove(id) else {
                    return Outcome::Fault("no-such-transaction");
                };
                let conflicted = txn
                    .iter()
                    .any(|(key, staged)| staged.snapshot != self.live.get(key).cloned());
                if conflicted {
                    return Outcome::Fault("transaction-conflict");
                }
                for (key, staged) in txn {
                    match staged.value {
                        Some(value) => {
                            self.live.insert(key, value);
                        }
                        None => {
                            self.live.remove(&key);
                        }
                    }
                }
                Outcome::Done
            }
        }
    }
}

/// Builds a deterministic operation sequence from a seed.
///
/// Keys, ids and values are drawn from deliberately small spaces so that
/// staging, retouching, conflicts and id reuse all occur within short
/// sequences.
#[must_use]
pub fn scripted_sequence(seed: u64, len: usize) -> Vec<ModelOp> {
    const KEYS: [&str; 5] = ["a", "b", "c", "d", "e"];
    const IDS: [&str; 3] = ["t1", "t2", "t3"];

    let mut state = seed;
    let mut next = move || {
        let mut hasher = DefaultHasher::new();
        state.hash(&mut hasher);
        state = hasher.finish();
        state
    };

    (0..len)
        .map(|_| {
            let key = KEYS[(next() % KEYS.len() as u64) as usize].to_string();
            let id = IDS[(next() % IDS.len() as u64) as usize].to_string();
            let value = format!("v{}", next() % 7);
            match next() % 9 {
                0 => ModelOp::Set { key, value },
                1 => ModelOp::Get { key },
                2 => ModelOp::Remove { key },
                3 => ModelOp::Open { id },
                4 => ModelOp::SetIn { id, key, value },
                5 => ModelOp::GetIn { id, key },
                6 => ModelOp::RemoveIn { id, key },
                7 => ModelOp::Rollback { id },
                _ => ModelOp::Commit { id },
            }
        })
        .collect()
}

/// Runs a sequence against a fresh engine and oracle in lockstep.
///
/// # Errors
///
/// Returns a description of the first diverging step.
pub fn check_sequence(ops: &[ModelOp]) -> Result<(), String> {
    let store = Store::new();
    let mut oracle = Oracle::new();
    for (index, op) in ops.iter().enumerate() {
        let engine = run_engine_op(&store, op);
        let model = oracle.run_op(op);
        if engine != model {
            return Err(format!(
                "step {index}: {op:?} diverged (engine {engine:?}, oracle {model:?})"
            ));
        }
    }
    Ok(())
}
