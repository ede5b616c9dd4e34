//! End-to-end engine scenarios, single-threaded and concurrent.

use optikv_core::{Store, StoreError};
use std::sync::Arc;
use std::thread;

#[test]
fn basic_auto_commit_round_trip() {
    let store = Store::new();

    store.set("example", "foo").unwrap();
    assert_eq!(store.get("example").as_deref(), Some("foo"));

    store.remove("example");
    assert_eq!(store.get("example"), None);

    // removing an absent key succeeds
    store.remove("example");
    assert_eq!(store.get("example"), None);
}

#[test]
fn set_remove_get_laws() {
    let store = Store::new();

    store.set("k", "v").unwrap();
    assert_eq!(store.get("k").as_deref(), Some("v"));

    store.set("k", "v2").unwrap();
    assert_eq!(store.get("k").as_deref(), Some("v2"));

    store.remove("k");
    assert_eq!(store.get("k"), None);
}

#[test]
fn conflicting_transactions_abort_and_rolled_back_ids_stay_dead() {
    let store = Store::new();

    // staged writes stay isolated
    store.open_transaction("abc").unwrap();
    assert_eq!(
        store.open_transaction("abc"),
        Err(StoreError::DuplicateTransaction { id: "abc".into() })
    );
    store.set_in("abc", "a", "foo").unwrap();
    assert_eq!(store.get_in("abc", "a").unwrap().as_deref(), Some("foo"));
    assert_eq!(store.get("a"), None);

    // an independent transaction commits the same key first
    store.open_transaction("xyz").unwrap();
    store.set_in("xyz", "a", "bar").unwrap();
    assert_eq!(store.get_in("xyz", "a").unwrap().as_deref(), Some("bar"));
    store.commit_transaction("xyz").unwrap();
    assert_eq!(store.get("a").as_deref(), Some("bar"));

    // abc staged `a` before it existed; the committed create is a conflict
    assert_eq!(
        store.commit_transaction("abc"),
        Err(StoreError::TransactionConflict { id: "abc".into() })
    );
    assert_eq!(store.get("a").as_deref(), Some("bar"));

    // a rolled-back id cannot be used again
    store.open_transaction("abc").unwrap();
    store.set_in("abc", "a", "foo").unwrap();
    assert_eq!(store.get("a").as_deref(), Some("bar"));
    store.rollback_transaction("abc").unwrap();
    assert_eq!(
        store.set_in("abc", "a", "foo"),
        Err(StoreError::NoSuchTransaction { id: "abc".into() })
    );
    assert_eq!(store.get("a").as_deref(), Some("bar"));
}

#[test]
fn double_commit_applies_once() {
    let store = Arc::new(Store::new());
    store.open_transaction("def").unwrap();
    store.set_in("def", "b", "foo").unwrap();
    store.set_in("def", "c", "caz").unwrap();
    store.set_in("def", "d", "ert").unwrap();

    let committers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.commit_transaction("def"))
        })
        .collect();
    let results: Vec<_> = committers
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    // one thread commits; the other sees a finished transaction and either
    // returns quietly or reports it missing
    for result in &results {
        match result {
            Ok(()) | Err(StoreError::NoSuchTransaction { .. }) => {}
            other => panic!("unexpected double-commit outcome: {other:?}"),
        }
    }
    assert_eq!(store.get("b").as_deref(), Some("foo"));
    assert_eq!(store.get("c").as_deref(), Some("caz"));
    assert_eq!(store.get("d").as_deref(), Some("ert"));
    assert_eq!(store.transaction_count(), 0);
}

#[test]
fn overlapping_commits_apply_exactly_one_staging() {
    let store = Arc::new(Store::new());
    for (key, value) in [("b", "foo"), ("c", "caz"), ("d", "ert")] {
        store.set(key, value).unwrap();
    }

    store.open_transaction("aze").unwrap();
    store.set_in("aze", "b", "fro").unwrap();
    store.set_in("aze", "c", "crz").unwrap();
    store.set_in("aze", "d", "ert").unwrap();

    store.open_transaction("ghj").unwrap();
    store.set_in("ghj", "b", "for").unwrap();
    store.set_in("ghj", "c", "car").unwrap();
    store.set_in("ghj", "d", "err").unwrap();

    let handles: Vec<_> = ["aze", "ghj"]
        .into_iter()
        .map(|id| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.commit_transaction(id))
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let wins = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(StoreError::TransactionConflict { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1), "outcomes: {results:?}");

    let observed = (store.get("b"), store.get("c"), store.get("d"));
    let aze = (
        Some("fro".to_string()),
        Some("crz".to_string()),
        Some("ert".to_string()),
    );
    let ghj = (
        Some("for".to_string()),
        Some("car".to_string()),
        Some("err".to_string()),
    );
    assert!(
        observed == aze || observed == ghj,
        "mixed staging observed: {observed:?}"
    );
}

#[test]
fn disjoint_commits_all_succeed() {
    let store = Arc::new(Store::new());
    for t in 0..4 {
        let id = format!("txn-{t}");
        store.open_transaction(&id).unwrap();
        for i in 0..3 {
            store
                .set_in(&id, &format!("key-{t}-{i}"), &format!("value-{t}-{i}"))
                .unwrap();
        }
    }

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.commit_transaction(&format!("txn-{t}")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    for t in 0..4 {
        for i in 0..3 {
            assert_eq!(
                store.get(&format!("key-{t}-{i}")).as_deref(),
                Some(format!("value-{t}-{i}").as_str())
            );
        }
    }
    assert_eq!(store.transaction_count(), 0);
}

#[test]
fn staged_pairs_apply_atomically_under_contention() {
    let store = Arc::new(Store::new());
    store.set("x", "seed").unwrap();
    store.set("y", "seed").unwrap();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..50 {
                    let id = format!("writer-{t}-{round}");
                    let tag = format!("tag-{t}-{round}");
                    store.open_transaction(&id).unwrap();
                    store.set_in(&id, "x", &tag).unwrap();
                    store.set_in(&id, "y", &tag).unwrap();
                    match store.commit_transaction(&id) {
                        Ok(()) | Err(StoreError::TransactionConflict { .. }) => {}
                        other => panic!("unexpected commit outcome: {other:?}"),
                    }
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    // every winner rewrote the pair under both write guards, so the pair can
    // never come apart, and the first commit to reach validation always wins
    let (x, y) = (store.get("x"), store.get("y"));
    assert_eq!(x, y, "overlapping commits tore the pair apart");
    assert_ne!(x.as_deref(), Some("seed"));
    assert_eq!(store.transaction_count(), 0);
}

#[test]
fn concurrent_direct_writers_leave_one_written_value() {
    let store = Arc::new(Store::new());
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100 {
                    let value = format!("v-{t}-{i}");
                    match store.set("shared", &value) {
                        Ok(()) | Err(StoreError::WriteLost { .. }) => {}
                        other => panic!("unexpected set outcome: {other:?}"),
                    }
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    let value = store.get("shared").expect("key must exist");
    assert!(value.starts_with("v-"), "torn or foreign value: {value}");
}

#[test]
fn removers_racing_commits_never_wedge_the_store() {
    let store = Arc::new(Store::new());
    for i in 0..8 {
        store.set(&format!("k{i}"), "seed").unwrap();
    }

    let remover = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..100 {
                store.remove("k3");
                match store.set("k3", "fresh") {
                    Ok(()) | Err(StoreError::WriteLost { .. }) => {}
                    other => panic!("unexpected re-create outcome: {other:?}"),
                }
            }
        })
    };
    let committer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for round in 0..100 {
                let id = format!("c-{round}");
                store.open_transaction(&id).unwrap();
                store.set_in(&id, "k3", "staged").unwrap();
                store.set_in(&id, "k5", "staged").unwrap();
                match store.commit_transaction(&id) {
                    Ok(()) | Err(StoreError::TransactionConflict { .. }) => {}
                    other => panic!("unexpected commit outcome: {other:?}"),
                }
            }
        })
    };
    remover.join().unwrap();
    committer.join().unwrap();

    // the store still serves reads and writes on the contended keys
    assert!(store.get("k5").is_some());
    store.set("k3", "after").unwrap();
    assert_eq!(store.get("k3").as_deref(), Some("after"));
}

#[test]
fn rollback_racing_commit_settles_on_one_outcome() {
    for _ in 0..20 {
        let store = Arc::new(Store::new());
        store.set("k", "seed").unwrap();
        store.open_transaction("t").unwrap();
        store.set_in("t", "k", "staged").unwrap();

        let committer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.commit_transaction("t"))
        };
        let roller = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.rollback_transaction("t"))
        };
        let commit_result = committer.join().unwrap();
        let rollback_result = roller.join().unwrap();

        match commit_result {
            // commit won, or it lost the transaction mutex to the rollback
            // and returned quietly
            Ok(()) => {}
            // rollback unmapped the transaction before commit looked it up
            Err(StoreError::NoSuchTransaction { .. }) => {}
            other => panic!("unexpected commit outcome: {other:?}"),
        }
        match rollback_result {
            Ok(()) | Err(StoreError::NoSuchTransaction { .. }) => {}
            other => panic!("unexpected rollback outcome: {other:?}"),
        }

        // either the staging applied in full or not at all
        let value = store.get("k").expect("key must survive");
        assert!(value == "seed" || value == "staged", "torn value: {value}");
        assert_eq!(store.transaction_count(), 0);
    }
}
