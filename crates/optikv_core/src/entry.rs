//! Live entries and their guard pair.

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, MutexGuard, RawMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owned write-guard handle. Commit holds these across entries-map edits and
/// drops them in reverse key order, so they must not borrow the entry.
pub(crate) type WriteGuard = ArcMutexGuard<RawMutex, ()>;

/// A live record in the store.
///
/// The value's own mutex is the read guard: readers hold it while copying
/// the value out, writers hold it briefly while publishing. The write guard
/// serializes writers and commits. `alive` turned false marks a tombstone:
/// the entry is about to leave the map and no new guard may be taken on it,
/// which is what makes erasing an entry safe while other threads still hold
/// an `Arc` to it.
#[derive(Debug)]
pub(crate) struct Entry {
    value: Mutex<String>,
    write_guard: Arc<Mutex<()>>,
    alive: AtomicBool,
}

impl Entry {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(value.into()),
            write_guard: Arc::new(Mutex::new(())),
            alive: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Tombstones the entry. Callers hold the write guard; the value lock is
    /// taken so no reader observes the flag flip mid-copy.
    pub(crate) fn kill(&self) {
        let _read = self.value.lock();
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn lock_write(&self) -> MutexGuard<'_, ()> {
        self.write_guard.lock()
    }

    pub(crate) fn lock_write_owned(&self) -> WriteGuard {
        self.write_guard.lock_arc()
    }

    /// Copies the current value out under the read guard.
    pub(crate) fn read_value(&self) -> String {
        self.value.lock().clone()
    }

    /// Publishes a new value under the read guard. Callers hold the write
    /// guard.
    pub(crate) fn publish(&self, value: &str) {
        let mut current = self.value.lock();
        current.clear();
        current.push_str(value);
    }

    /// Compares the current value under the read guard.
    pub(crate) fn value_matches(&self, expected: &str) -> bool {
        *self.value.lock() == expected
    }
}
