use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - creates and tracks transactions and drives their
/// terminal transitions. Ids are handed out monotonically, so a smaller
/// id always means an older transaction (which is what wound-wait keys
/// its victim selection on).
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Lock manager reference
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, Arc::clone(&txn));
        txn
    }

    /// Commit a transaction and release every lock it still holds. Fails
    /// if the transaction already reached a terminal state (a wound-wait
    /// abort can land any time before this call).
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.finish(TransactionState::Committed) {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn.id()));
            }
            _ => {}
        }

        self.lock_manager.release_all(txn);
        self.active_transactions.lock().remove(&txn.id());

        Ok(())
    }

    /// Abort a transaction and release every lock it still holds. A
    /// transaction already aborted by wound-wait still needs this cleanup
    /// pass, so aborting twice is not an error.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.finish(TransactionState::Aborted) == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        self.lock_manager.release_all(txn);
        self.active_transactions.lock().remove(&txn.id());

        Ok(())
    }

    /// Get a live transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}
