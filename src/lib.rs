// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPool, BufferPoolError, BufferPoolManager, ParallelBufferPoolManager};
pub use storage::disk::DiskManager;
pub use index::hash::{ExtendibleHashTable, HashTableError};
pub use transaction::concurrency::{
    IsolationLevel, LockManager, Transaction, TransactionManager, TransactionState,
};
