//! # optikv
//!
//! In-memory, string-keyed, string-valued store with named, optimistic,
//! multi-key transactions.
//!
//! This crate provides:
//! - Direct (auto-commit) reads, writes and removals
//! - Named transactions that stage instructions and commit atomically
//! - Commit-time conflict detection against first-touch snapshots
//! - Key-ordered lock acquisition so overlapping commits cannot deadlock
//!
//! The store is strictly in-memory and volatile; nothing survives the
//! process.
//!
//! ## Quick Start
//!
//! ```
//! use optikv_core::Store;
//!
//! let store = Store::new();
//!
//! // Direct operations apply immediately
//! store.set("user:1", "alice")?;
//! assert_eq!(store.get("user:1").as_deref(), Some("alice"));
//!
//! // Staged operations apply at commit, all or nothing
//! store.open_transaction("signup")?;
//! store.set_in("signup", "user:2", "bob")?;
//! assert_eq!(store.get("user:2"), None);
//! store.commit_transaction("signup")?;
//! assert_eq!(store.get("user:2").as_deref(), Some("bob"));
//! # Ok::<(), optikv_core::StoreError>(())
//! ```
//!
//! ## Isolation
//!
//! A transaction's conflict baseline is captured per key, at the moment the
//! transaction first touches that key. Commit fails with
//! [`StoreError::TransactionConflict`] if any touched key changed between
//! first touch and commit, whether through another transaction or a direct
//! write. There is no whole-transaction snapshot and no multi-version
//! history.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod store;
mod transaction;

pub use error::{StoreError, StoreResult};
pub use store::Store;
