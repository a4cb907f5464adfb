use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// Bookkeeping for one slot of the frame array. The frame is exactly one
/// of: on the free list, pinned (`pin_count > 0`), or evictable (present
/// in the replacer).
struct Frame {
    page: PagePtr,
    /// Identity of the resident page, `INVALID_PAGE_ID` when free.
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// All mutable buffer pool state, guarded by one latch so every public
/// operation is atomic with respect to the others.
struct Core {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed frame array over a disk manager,
/// with LRU replacement and pin/unpin reference counting.
///
/// Page ids allocated by this instance satisfy
/// `id % num_instances == instance_index`, so a set of instances can
/// shard a single page-id space (see `ParallelBufferPoolManager`).
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,
    latch: Mutex<Core>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// A standalone instance owning the whole page-id space.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_instance(pool_size, 1, 0, disk_manager)
    }

    /// One shard out of `num_instances`.
    pub fn with_instance(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "buffer pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        // Initially every frame is free.
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            num_instances,
            instance_index,
            latch: Mutex::new(Core {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index as PageId,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Create a brand-new page, pinned once. Fails with `BufferPoolFull`
    /// when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut core = self.latch.lock();

        if core.frames.iter().all(|f| f.pin_count > 0) {
            return Err(BufferPoolError::BufferPoolFull);
        }

        let frame_id = self.find_victim(&mut core)?;
        let page_id = self.allocate_page(&mut core);

        let frame = &mut core.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = Arc::clone(&frame.page);

        self.replacer.pin(frame_id);
        core.page_table.insert(page_id, frame_id);

        Ok((page, page_id))
    }

    /// Fetch a page from the pool, reading it from disk if necessary.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::PageNotFound(page_id));
        }

        let mut core = self.latch.lock();

        if let Some(&frame_id) = core.page_table.get(&page_id) {
            let frame = &mut core.frames[frame_id];
            frame.pin_count += 1;
            let page = Arc::clone(&frame.page);
            self.replacer.pin(frame_id);
            return Ok(page);
        }

        let frame_id = self.find_victim(&mut core)?;

        {
            let mut page = core.frames[frame_id].page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // The frame was taken off the free list / replacer; give
                // it back so accounting stays consistent.
                drop(page);
                core.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let frame = &mut core.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = Arc::clone(&frame.page);

        core.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(page)
    }

    /// Drop one pin on a page. The dirty flag is sticky: once a page is
    /// marked dirty it stays dirty until written back at eviction.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut core = self.latch.lock();

        let frame_id = *core
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let frame = &mut core.frames[frame_id];

        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        frame.is_dirty |= is_dirty;
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page's bytes to disk, dirty or not. The dirty
    /// flag is left as-is: clearing it is the caller's call.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let core = self.latch.lock();

        let frame_id = *core
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let data = core.frames[frame_id].page.read().data;
        self.disk_manager.write_page(page_id, &data)?;

        Ok(())
    }

    /// Write every resident page to disk.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let core = self.latch.lock();

        for (&page_id, &frame_id) in core.page_table.iter() {
            let data = core.frames[frame_id].page.read().data;
            self.disk_manager.write_page(page_id, &data)?;
        }

        Ok(())
    }

    /// Remove a page from the pool and release its id. A page that is not
    /// resident deletes trivially; a pinned page refuses.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        // Id release happens before the pin check, mirroring the delete
        // protocol this pool inherited; deallocation is a metadata no-op
        // so the ordering is not observable today.
        self.disk_manager.deallocate_page(page_id);

        let mut core = self.latch.lock();

        let frame_id = match core.page_table.get(&page_id) {
            None => return Ok(()),
            Some(&frame_id) => frame_id,
        };
        if core.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        core.page_table.remove(&page_id);
        let frame = &mut core.frames[frame_id];
        frame.page.write().reset();
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;

        // The frame was evictable; it goes back to the free list instead.
        self.replacer.pin(frame_id);
        core.free_list.push_back(frame_id);

        Ok(())
    }

    /// Hand out the next page id in this instance's residue class.
    fn allocate_page(&self, core: &mut Core) -> PageId {
        let page_id = core.next_page_id;
        core.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "allocated page id escaped this instance's residue class"
        );
        page_id
    }

    /// Find a frame to (re)use: free list first, then the replacer. A
    /// victim's dirty page is written back before the frame is recycled.
    fn find_victim(&self, core: &mut Core) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = core.free_list.pop_back() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)?;
        let frame = &core.frames[frame_id];

        if frame.page_id != INVALID_PAGE_ID {
            if frame.is_dirty {
                debug!(
                    "evicting dirty page {} from frame {}",
                    frame.page_id, frame_id
                );
                let data = frame.page.read().data;
                self.disk_manager.write_page(frame.page_id, &data)?;
            }
            let old_page_id = frame.page_id;
            core.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}

impl BufferPool for BufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolManager::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }
}
