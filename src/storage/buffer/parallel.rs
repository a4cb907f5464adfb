use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// Shards one page-id space across `num_instances` buffer pool instances
/// by `page_id % num_instances`. Per-page operations route to the owning
/// instance; `new_page` round-robins so allocation pressure spreads.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    start_index: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    /// `pool_size` frames *per instance*, all instances over one shared
    /// disk manager.
    pub fn new(num_instances: usize, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0, "parallel pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolManager::with_instance(
                    pool_size,
                    num_instances,
                    i,
                    Arc::clone(&disk_manager),
                ))
            })
            .collect();

        Self {
            instances,
            start_index: Mutex::new(0),
        }
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Total number of frames across all instances.
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    /// The instance responsible for a given page id.
    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id.rem_euclid(self.instances.len() as PageId) as usize]
    }

    /// Round-robin allocation: try each instance starting at the cursor,
    /// bump the cursor on success, and give up only after every instance
    /// reported a full pool.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut start = self.start_index.lock();

        for i in 0..self.instances.len() {
            let idx = (*start + i) % self.instances.len();
            match self.instances[idx].new_page() {
                Ok(result) => {
                    *start = (*start + 1) % self.instances.len();
                    return Ok(result);
                }
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::BufferPoolFull)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }
}

impl BufferPool for ParallelBufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        ParallelBufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        ParallelBufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPoolManager::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        ParallelBufferPoolManager::pool_size(self)
    }
}
