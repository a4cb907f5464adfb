use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type (index into the frame array)
pub type FrameId = usize;

/// Transaction ID type. Lower id = older transaction.
pub type TxnId = u32;

/// Row identifier: the page a tuple lives on plus its slot number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Zero the payload and forget the identity.
    pub fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
    }
}

/// Smart pointer to a page. The `RwLock` doubles as the per-page
/// reader/writer latch; a caller must not touch the page after its
/// matching unpin, because the frame may be recycled underneath it.
pub type PagePtr = Arc<RwLock<Page>>;
