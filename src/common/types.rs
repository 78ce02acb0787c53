use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Transaction ID type
pub type TxnId = i32;

/// Sentinel for "no transaction"
pub const INVALID_TXN_ID: TxnId = -1;

/// Record ID type
pub type Rid = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = u32;

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload without touching the page id
    pub fn reset_memory(&mut self) {
        self.data = [0; PAGE_SIZE];
    }
}

/// Smart pointer to a page; the inner lock doubles as the per-page latch
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure.
///
/// Page contents live behind the page latch inside `page`; the bookkeeping
/// fields are only touched while holding the pool mutex.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub page_id: PageId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            page_id: INVALID_PAGE_ID,
            is_dirty: false,
            pin_count: 0,
        }
    }
}
