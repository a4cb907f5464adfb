// Represents an active database transaction

use std::collections::HashSet;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction starts growing, moves to
/// shrinking on its first unlock (under repeatable read), and ends
/// committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),
}

/// Transaction - represents an active database transaction.
///
/// State and lock sets sit behind their own mutexes: the lock manager
/// mutates *other* transactions when it wounds them, so every field a
/// peer can touch needs interior mutability.
pub struct Transaction {
    /// Transaction ID; lower id = older transaction
    id: TxnId,

    /// Isolation level for this transaction
    isolation_level: IsolationLevel,

    /// Current two-phase locking state
    state: Mutex<TransactionState>,

    /// Row ids this transaction holds shared locks on
    shared_lock_set: Mutex<HashSet<Rid>>,

    /// Row ids this transaction holds exclusive locks on
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    /// Create a new transaction with the given ID
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id: txn_id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    /// Get transaction ID
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Get transaction isolation level
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Get the current state
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Set the current state
    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Move into a terminal state, atomically with respect to concurrent
    /// transitions. A committed transaction stays committed, and an
    /// aborted one cannot be committed. Returns the state held before
    /// the call.
    pub(crate) fn finish(&self, target: TransactionState) -> TransactionState {
        let mut state = self.state.lock();
        let previous = *state;
        let applies = match (previous, target) {
            (TransactionState::Committed, _) => false,
            (TransactionState::Aborted, TransactionState::Committed) => false,
            _ => true,
        };
        if applies {
            *state = target;
        }
        previous
    }

    /// Whether this transaction holds a shared lock on `rid`
    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    /// Whether this transaction holds an exclusive lock on `rid`
    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Snapshot of the shared lock set
    pub fn shared_lock_set(&self) -> HashSet<Rid> {
        self.shared_lock_set.lock().clone()
    }

    /// Snapshot of the exclusive lock set
    pub fn exclusive_lock_set(&self) -> HashSet<Rid> {
        self.exclusive_lock_set.lock().clone()
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }
}
