//! Stress drivers for the optikv engine.
//!
//! These drivers verify behavior under load and concurrent access: direct
//! writers contending on a small keyspace, and transactions with overlapping
//! staging committing from many threads.

use optikv_core::{Store, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressOutcome {
    /// Total operations performed.
    pub total_ops: usize,
    /// Operations that completed.
    pub accepted_ops: usize,
    /// Operations rejected by an expected contention class
    /// (`WriteLost`, `ZombieKey`, `TransactionConflict`).
    pub rejected_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressOutcome {
    /// Creates a new outcome.
    #[must_use]
    pub fn new(accepted: usize, rejected: usize, duration: Duration) -> Self {
        let total = accepted + rejected;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            accepted_ops: accepted,
            rejected_ops: rejected,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Accepted: {}", self.accepted_ops);
        println!("Rejected: {}", self.rejected_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Workload shape for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform across all threads.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct keys in the workload.
    pub keys: usize,
    /// Keys staged per transaction in commit workloads.
    pub staged_keys: usize,
    /// Seed for the deterministic workload generator.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 4_000,
            threads: 4,
            keys: 32,
            staged_keys: 3,
            seed: 0x00C0_FFEE,
        }
    }
}

fn key_for(config: &StressConfig, n: usize) -> String {
    format!("key-{:03}", n % config.keys)
}

/// Runs a sequential mixed workload of direct operations.
pub fn stress_direct_ops(store: &Store, config: &StressConfig) -> StressOutcome {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = Instant::now();
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    for i in 0..config.operations {
        let key = key_for(config, rng.gen_range(0..config.keys));
        match rng.gen_range(0..3) {
            0 => match store.set(&key, &format!("value-{i}")) {
                Ok(()) => accepted += 1,
                Err(_) => rejected += 1,
            },
            1 => {
                let _ = store.get(&key);
                accepted += 1;
            }
            _ => {
                store.remove(&key);
                accepted += 1;
            }
        }
    }

    StressOutcome::new(accepted, rejected, start.elapsed())
}

/// Runs a concurrent mixed workload of direct operations over a shared,
/// deliberately small keyspace.
///
/// # Panics
///
/// Panics if any operation fails with something other than a contention
/// class error.
pub fn stress_concurrent_direct_ops(store: &Arc<Store>, config: &StressConfig) -> StressOutcome {
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(store);
            let accepted = Arc::clone(&accepted);
            let rejected = Arc::clone(&rejected);
            let config = config.clone();

            thread::spawn(move || {
                let mut rng =
                    StdRng::seed_from_u64(config.seed ^ (t as u64).wrapping_mul(0x9E37_79B9));
                for i in 0..per_thread {
                    let key = key_for(&config, rng.gen_range(0..config.keys));
                    let outcome = match rng.gen_range(0..3) {
                        0 => store.set(&key, &format!("value-{t}-{i}")),
                        1 => {
                            let _ = store.get(&key);
                            Ok(())
                        }
                        _ => {
                            store.remove(&key);
                            Ok(())
                        }
                    };
                    match outcome {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(
                            StoreError::WriteLost { .. } | StoreError::ZombieKey { .. },
                        ) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(other) => panic!("unexpected direct-op failure: {other}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("stress thread panicked");
    }

    StressOutcome::new(
        accepted.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Runs concurrent transactions with overlapping staged key sets.
///
/// Each thread repeatedly opens a uniquely named transaction, stages
/// `staged_keys` writes (occasionally restaged as removals) over the shared
/// keyspace, and commits. Conflicts are the expected rejection class.
///
/// # Panics
///
/// Panics if opening, staging or committing fails with anything other than
/// a `TransactionConflict`.
pub fn stress_concurrent_commits(store: &Arc<Store>, config: &StressConfig) -> StressOutcome {
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(store);
            let accepted = Arc::clone(&accepted);
            let rejected = Arc::clone(&rejected);
            let config = config.clone();

            thread::spawn(move || {
                let mut rng =
                    StdRng::seed_from_u64(config.seed ^ (t as u64).wrapping_mul(0xA24B_AED4));
                for i in 0..per_thread {
                    let id = format!("stress-{t}-{i}");
                    store.open_transaction(&id).expect("fresh id must open");

                    for s in 0..config.staged_keys {
                        let key = key_for(&config, rng.gen_range(0..config.keys));
                        store
                            .set_in(&id, &key, &format!("staged-{t}-{i}-{s}"))
                            .expect("staging into a live transaction");
                        if rng.gen_range(0..8) == 0 {
                            store
                                .remove_in(&id, &key)
                                .expect("restaging a touched key");
                        }
                    }

                    match store.commit_transaction(&id) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(StoreError::TransactionConflict { .. }) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(other) => panic!("unexpected commit failure: {other}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("stress thread panicked");
    }

    StressOutcome::new(
        accepted.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
