pub mod concurrency;

// Public exports
pub use concurrency::{
    IsolationLevel, LockError, LockManager, Transaction, TransactionError, TransactionManager,
    TransactionState,
};
