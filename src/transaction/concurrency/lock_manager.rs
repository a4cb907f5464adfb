use std::collections::HashMap;
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Typed lock faults. Every variant leaves the requesting transaction
/// aborted (an already-aborted requester fails with `Deadlock` without a
/// state change).
#[derive(Error, Debug)]
pub enum LockError {
    #[error("transaction {0} was aborted by deadlock prevention")]
    Deadlock(TxnId),

    #[error("transaction {0} tried to acquire a lock in the shrinking phase")]
    LockOnShrinking(TxnId),

    #[error("transaction {0} requested a shared lock under READ UNCOMMITTED")]
    SharedOnReadUncommitted(TxnId),

    #[error("transaction {0} lost an upgrade race")]
    UpgradeConflict(TxnId),
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn: Arc<Transaction>, mode: LockMode) -> Self {
        Self {
            txn,
            mode,
            granted: false,
        }
    }
}

/// FIFO queue of lock requests on one row. The condvar lives behind an
/// `Arc` so a waiter can keep a handle across the wait while the queue
/// itself stays inside the manager latch.
struct LockRequestQueue {
    requests: Vec<LockRequest>,
    /// Transaction currently upgrading S -> X on this row, if any.
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: Vec::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Row-granularity two-phase lock manager with shared/exclusive modes,
/// lock upgrade, and wound-wait deadlock prevention: an older transaction
/// aborts ("wounds") younger conflicting lock holders, a younger
/// transaction waits for older ones, so no wait cycle can form.
///
/// One latch guards the whole lock table; waiting happens on per-row
/// condvars against that latch. Queues are created lazily and never
/// removed, so a waiter always finds its queue when it wakes.
pub struct LockManager {
    latch: Mutex<LockTable>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.latch.lock();

        Self::check_two_phase(txn)?;
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            // Reads do not take shared locks at this isolation level.
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::SharedOnReadUncommitted(txn.id()));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new)
            .requests
            .push(LockRequest::new(Arc::clone(txn), LockMode::Shared));

        let my_id = txn.id();
        loop {
            if txn.state() == TransactionState::Aborted {
                Self::withdraw(&mut table, rid, my_id);
                return Err(LockError::Deadlock(my_id));
            }

            let queue = match table.get_mut(&rid) {
                Some(queue) => queue,
                None => return Err(LockError::Deadlock(my_id)),
            };
            let cv = Arc::clone(&queue.cv);

            if !queue.requests.iter().any(|r| r.txn.id() == my_id) {
                // Our entry vanished: a wounder removed it.
                return Err(LockError::Deadlock(my_id));
            }

            // Wound-wait over the requests ahead of ours: a granted
            // shared lock is compatible, a younger exclusive request is
            // wounded, and anything else (an older exclusive, a shared
            // request still waiting) makes us wait.
            let victims: Vec<TxnId> = queue
                .requests
                .iter()
                .take_while(|r| r.txn.id() != my_id)
                .filter(|r| r.mode == LockMode::Exclusive && r.txn.id() > my_id)
                .map(|r| r.txn.id())
                .collect();
            Self::wound(queue, &victims, rid);

            let blocked = queue
                .requests
                .iter()
                .take_while(|r| r.txn.id() != my_id)
                .any(|r| !(r.mode == LockMode::Shared && r.granted));

            if !blocked {
                if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == my_id) {
                    request.granted = true;
                }
                queue.cv.notify_all();
                break;
            }

            cv.wait(&mut table);
        }

        txn.add_shared_lock(rid);
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.latch.lock();

        Self::check_two_phase(txn)?;
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new)
            .requests
            .push(LockRequest::new(Arc::clone(txn), LockMode::Exclusive));

        let my_id = txn.id();
        loop {
            if txn.state() == TransactionState::Aborted {
                Self::withdraw(&mut table, rid, my_id);
                return Err(LockError::Deadlock(my_id));
            }

            let queue = match table.get_mut(&rid) {
                Some(queue) => queue,
                None => return Err(LockError::Deadlock(my_id)),
            };
            let cv = Arc::clone(&queue.cv);

            if !queue.requests.iter().any(|r| r.txn.id() == my_id) {
                return Err(LockError::Deadlock(my_id));
            }

            // Exclusive conflicts with everything: every younger request
            // ahead of ours is wounded, any older one makes us wait. At
            // the head of the queue we grant immediately.
            let victims: Vec<TxnId> = queue
                .requests
                .iter()
                .take_while(|r| r.txn.id() != my_id)
                .filter(|r| r.txn.id() > my_id)
                .map(|r| r.txn.id())
                .collect();
            Self::wound(queue, &victims, rid);

            let blocked = queue
                .requests
                .iter()
                .take_while(|r| r.txn.id() != my_id)
                .count()
                > 0;

            if !blocked {
                if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == my_id) {
                    request.granted = true;
                }
                break;
            }

            cv.wait(&mut table);
        }

        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrade an already-held shared lock on `rid` to exclusive. Only
    /// one upgrade may be in flight per row; a second upgrader fails with
    /// `UpgradeConflict`.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.latch.lock();

        Self::check_two_phase(txn)?;
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let my_id = txn.id();
        match table.get_mut(&rid) {
            Some(queue) if txn.is_shared_locked(rid) => match queue.upgrading {
                Some(other) if other != my_id => {
                    txn.set_state(TransactionState::Aborted);
                    return Err(LockError::UpgradeConflict(my_id));
                }
                _ => queue.upgrading = Some(my_id),
            },
            // Upgrading without holding the shared lock is a protocol
            // violation by the caller.
            _ => {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::UpgradeConflict(my_id));
            }
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                if let Some(queue) = table.get_mut(&rid) {
                    if queue.upgrading == Some(my_id) {
                        queue.upgrading = None;
                    }
                }
                Self::withdraw(&mut table, rid, my_id);
                return Err(LockError::Deadlock(my_id));
            }

            let queue = match table.get_mut(&rid) {
                Some(queue) => queue,
                None => return Err(LockError::Deadlock(my_id)),
            };
            let cv = Arc::clone(&queue.cv);

            if !queue.requests.iter().any(|r| r.txn.id() == my_id) {
                if queue.upgrading == Some(my_id) {
                    queue.upgrading = None;
                }
                return Err(LockError::Deadlock(my_id));
            }

            // The upgraded lock conflicts with every other request on the
            // row, wherever it sits in the queue: wound the younger ones,
            // wait for the older ones, and flip our entry once the queue
            // holds only us.
            let victims: Vec<TxnId> = queue
                .requests
                .iter()
                .filter(|r| r.txn.id() != my_id && r.txn.id() > my_id)
                .map(|r| r.txn.id())
                .collect();
            Self::wound(queue, &victims, rid);

            let alone = queue.requests.iter().all(|r| r.txn.id() == my_id);
            if alone {
                if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == my_id) {
                    request.mode = LockMode::Exclusive;
                    request.granted = true;
                }
                queue.upgrading = None;
                break;
            }

            cv.wait(&mut table);
        }

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Release a lock on `rid`. Under repeatable read, the first unlock
    /// moves the transaction into its shrinking phase; the weaker levels
    /// may release shared locks early without the transition.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) {
        let mut table = self.latch.lock();

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        Self::withdraw(&mut table, rid, txn.id());
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
    }

    /// Drop every lock a finished transaction still holds, without the
    /// two-phase transition. Called by commit and abort.
    pub fn release_all(&self, txn: &Transaction) {
        let mut table = self.latch.lock();

        let mut rids: Vec<Rid> = txn.shared_lock_set().into_iter().collect();
        rids.extend(txn.exclusive_lock_set());

        for rid in rids {
            Self::withdraw(&mut table, rid, txn.id());
            txn.remove_shared_lock(rid);
            txn.remove_exclusive_lock(rid);
        }
    }

    /// Growing-phase gate shared by every acquire path.
    fn check_two_phase(txn: &Transaction) -> Result<(), LockError> {
        match txn.state() {
            TransactionState::Aborted => Err(LockError::Deadlock(txn.id())),
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                Err(LockError::LockOnShrinking(txn.id()))
            }
            _ => Ok(()),
        }
    }

    /// Abort the victims and drop their entries from the queue. The
    /// wounded transactions' waiting threads observe the aborted state on
    /// wake-up and withdraw. A victim that just committed is left alone:
    /// its entry disappears when the commit releases its locks.
    fn wound(queue: &mut LockRequestQueue, victims: &[TxnId], rid: Rid) {
        if victims.is_empty() {
            return;
        }
        for &victim_id in victims {
            if let Some(pos) = queue.requests.iter().position(|r| r.txn.id() == victim_id) {
                if queue.requests[pos].txn.finish(TransactionState::Aborted)
                    == TransactionState::Committed
                {
                    continue;
                }
                let request = queue.requests.remove(pos);
                request.txn.remove_shared_lock(rid);
                request.txn.remove_exclusive_lock(rid);
                debug!("wound-wait aborted younger transaction {}", victim_id);
            }
        }
        queue.cv.notify_all();
    }

    /// Remove a transaction's request from a queue (if present) and wake
    /// the remaining waiters.
    fn withdraw(table: &mut LockTable, rid: Rid, txn_id: TxnId) {
        if let Some(queue) = table.get_mut(&rid) {
            if let Some(pos) = queue.requests.iter().position(|r| r.txn.id() == txn_id) {
                queue.requests.remove(pos);
            }
            queue.cv.notify_all();
            // The queue itself stays in the table even when empty.
        }
    }
}
