mod error;
mod manager;
mod parallel;
mod replacer;

pub use error::BufferPoolError;
pub use manager::BufferPoolManager;
pub use parallel::ParallelBufferPoolManager;
pub use replacer::LruReplacer;

use crate::common::types::{PageId, PagePtr};

/// Common surface of the single-instance and the parallel buffer pool.
/// Page consumers (the hash index, heap iterators) hold an
/// `Arc<dyn BufferPool>` and do not care which flavor backs it.
pub trait BufferPool: Send + Sync {
    /// Allocate a fresh page, pinned once.
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;

    /// Bring a page into memory (or find it there), pinned once more.
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;

    /// Drop one pin; `is_dirty` is sticky until the frame is written back.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;

    /// Write a resident page to disk unconditionally.
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Write every resident page to disk.
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;

    /// Drop a page from the pool and release its id. Succeeds trivially if
    /// the page is not resident; fails if it is pinned.
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Total number of frames.
    fn pool_size(&self) -> usize;
}
