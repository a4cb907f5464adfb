use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

use corvusdb::common::types::Rid;
use corvusdb::transaction::concurrency::{
    IsolationLevel, LockError, LockManager, Transaction, TransactionManager, TransactionState,
};

fn txn(id: u32) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, IsolationLevel::RepeatableRead))
}

/// Give a spawned thread time to reach its blocking wait.
fn settle() {
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn test_shared_lock_waits_for_older_exclusive_holder() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let rid = Rid::new(0, 0);

    let older = txn(0);
    let younger = txn(1);
    lm.lock_exclusive(&older, rid)?;

    let acquired = Arc::new(AtomicBool::new(false));
    let handle = {
        let lm = Arc::clone(&lm);
        let younger = Arc::clone(&younger);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            lm.lock_shared(&younger, rid).unwrap();
            acquired.store(true, Ordering::SeqCst);
        })
    };

    // The younger transaction waits instead of wounding the older holder
    settle();
    assert!(!acquired.load(Ordering::SeqCst));
    assert_eq!(younger.state(), TransactionState::Growing);

    lm.unlock(&older, rid);
    handle.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert!(younger.is_shared_locked(rid));

    Ok(())
}

#[test]
fn test_oldest_wounds_younger_holder_and_waiters_fan_in() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let rid = Rid::new(0, 0);

    let oldest = txn(0);
    let holder = txn(1);
    let waiter = txn(2);

    lm.lock_exclusive(&holder, rid)?;

    // The youngest queues up behind the exclusive holder
    let waiter_handle = {
        let lm = Arc::clone(&lm);
        let waiter = Arc::clone(&waiter);
        thread::spawn(move || lm.lock_shared(&waiter, rid))
    };
    settle();

    // The oldest transaction's shared request wounds the younger
    // exclusive holder and grants immediately.
    lm.lock_shared(&oldest, rid)?;
    assert_eq!(holder.state(), TransactionState::Aborted);
    assert!(oldest.is_shared_locked(rid));

    // With the exclusive holder gone, the waiting shared request grants
    // alongside the oldest's.
    waiter_handle.join().unwrap()?;
    assert!(waiter.is_shared_locked(rid));

    Ok(())
}

#[test]
fn test_wounded_waiter_fails_with_deadlock() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let rid = Rid::new(0, 0);

    let oldest = txn(0);
    let middle = txn(1);
    let youngest = txn(2);

    lm.lock_exclusive(&oldest, rid)?;

    // The youngest queues an exclusive request behind the holder
    let youngest_handle = {
        let lm = Arc::clone(&lm);
        let youngest = Arc::clone(&youngest);
        thread::spawn(move || lm.lock_exclusive(&youngest, rid))
    };
    settle();

    // The middle transaction's exclusive request wounds the younger
    // waiter ahead of it, then waits for the older holder.
    let middle_handle = {
        let lm = Arc::clone(&lm);
        let middle = Arc::clone(&middle);
        thread::spawn(move || lm.lock_exclusive(&middle, rid))
    };
    settle();

    let err = youngest_handle.join().unwrap().unwrap_err();
    assert!(matches!(err, LockError::Deadlock(2)));
    assert_eq!(youngest.state(), TransactionState::Aborted);

    // Releasing the oldest lets the middle transaction through
    lm.unlock(&oldest, rid);
    middle_handle.join().unwrap()?;
    assert!(middle.is_exclusive_locked(rid));

    Ok(())
}

#[test]
fn test_upgrade_conflict_is_rejected() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let rid = Rid::new(0, 0);

    let older = txn(0);
    let upgrader = txn(1);
    lm.lock_shared(&older, rid)?;
    lm.lock_shared(&upgrader, rid)?;

    // The upgrader has to wait out the older shared holder, leaving its
    // upgrade pending on the row.
    let upgrade_handle = {
        let lm = Arc::clone(&lm);
        let upgrader = Arc::clone(&upgrader);
        thread::spawn(move || lm.lock_upgrade(&upgrader, rid))
    };
    settle();

    // A second upgrade on the same row is refused outright
    let err = lm.lock_upgrade(&older, rid).unwrap_err();
    assert!(matches!(err, LockError::UpgradeConflict(0)));
    assert_eq!(older.state(), TransactionState::Aborted);

    // The failed upgrader's locks go away with its abort, unblocking the
    // pending upgrade.
    lm.release_all(&older);
    upgrade_handle.join().unwrap()?;
    assert!(upgrader.is_exclusive_locked(rid));
    assert!(!upgrader.is_shared_locked(rid));

    Ok(())
}

#[test]
fn test_contended_writers_all_terminate() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(Arc::clone(&lm)));
    let rid = Rid::new(0, 0);

    // Eight writers fight over one row. Wound-wait guarantees progress:
    // no thread hangs, and the oldest writer in any conflict always gets
    // through, so at least one transaction commits.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let lm = Arc::clone(&lm);
        let tm = Arc::clone(&tm);
        handles.push(thread::spawn(move || {
            let txn = tm.begin(IsolationLevel::RepeatableRead);
            match lm.lock_exclusive(&txn, rid) {
                Ok(()) => {
                    thread::sleep(Duration::from_millis(1));
                    // A holder can still be wounded by an older writer
                    // before it commits; it then finishes as aborted.
                    match tm.commit(&txn) {
                        Ok(()) => true,
                        Err(_) => {
                            tm.abort(&txn).unwrap();
                            false
                        }
                    }
                }
                Err(_) => {
                    tm.abort(&txn).unwrap();
                    false
                }
            }
        }));
    }

    let committed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&ok| ok)
        .count();
    assert!(committed >= 1);

    // Every queue entry was cleaned up on the way out: a fresh writer
    // acquires the row without waiting.
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_exclusive(&txn, rid)?;
    tm.commit(&txn)?;

    Ok(())
}

#[test]
fn test_two_phase_locking_is_enforced() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let tm = TransactionManager::new(Arc::clone(&lm));

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let r0 = Rid::new(0, 0);
    let r1 = Rid::new(0, 1);

    lm.lock_shared(&txn, r0)?;
    lm.lock_exclusive(&txn, r1)?;

    // First unlock ends the growing phase; any further acquisition fails
    // and aborts the transaction.
    lm.unlock(&txn, r0);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_shared(&txn, Rid::new(0, 2)).unwrap_err();
    assert!(matches!(err, LockError::LockOnShrinking(_)));
    assert_eq!(txn.state(), TransactionState::Aborted);

    tm.abort(&txn)?;
    assert!(!txn.is_exclusive_locked(r1));

    Ok(())
}
