use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;

/// Pool bookkeeping guarded by a single mutex. Disk I/O happens while it is
/// held, which keeps every public operation atomic.
struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<PoolInner>,
    replacer: LRUReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        Self::with_instances(pool_size, 1, 0, db_path)
    }

    /// Create one instance of a partitioned pool; instance `instance_index`
    /// of `num_instances` allocates only its own residue class of page ids.
    pub fn with_instances(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::with_instances(
            db_path,
            num_instances,
            instance_index,
        )?);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Frame::new(frame_id, page));
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LRUReplacer::new(pool_size),
            disk_manager,
        })
    }

    /// Allocate a brand-new page and pin it in a frame.
    ///
    /// Fails with `BufferPoolFull` when every frame has a nonzero pin count.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let page_id = self.disk_manager.allocate_page()?;

        let frame_id = self.find_free_frame(&mut inner)?;
        self.evict_and_install(&mut inner, frame_id, page_id)?;

        let frame = &mut inner.frames[frame_id];
        frame.pin_count = 1;
        self.replacer.pin(frame_id);

        Ok((frame.page.clone(), page_id))
    }

    /// Fetch a page from the buffer pool or disk, pinning it
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot fetch invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        // Already resident: bump the pin count and drop it from the victim
        // candidates.
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(frame.page.clone());
        }

        let frame_id = self.find_free_frame(&mut inner)?;
        self.evict_and_install(&mut inner, frame_id, page_id)?;

        let frame = &mut inner.frames[frame_id];
        {
            let mut page_guard = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page_guard)?;
        }
        frame.pin_count = 1;
        self.replacer.pin(frame_id);

        Ok(frame.page.clone())
    }

    /// Unpin a page, ORing `is_dirty` into the frame's dirty flag.
    ///
    /// Unpinning a page whose pin count is already zero is a caller bug and
    /// reported as `PageNotPinned`; the count never underflows.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &mut inner.frames[frame_id];
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk unconditionally and clear its dirty bit
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot flush invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &mut inner.frames[frame_id];
        {
            let page_guard = frame.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame.is_dirty = false;

        Ok(())
    }

    /// Write every resident dirty page to disk
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        for frame_id in 0..self.pool_size {
            let frame = &mut inner.frames[frame_id];
            if frame.page_id != INVALID_PAGE_ID && frame.is_dirty {
                {
                    let page_guard = frame.page.read();
                    self.disk_manager.write_page(&page_guard)?;
                }
                frame.is_dirty = false;
            }
        }

        Ok(())
    }

    /// Drop a page from the pool and release its id on disk.
    ///
    /// Deleting a page that is not resident succeeds trivially; deleting a
    /// pinned page fails with `PagePinned`.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot delete invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.disk_manager.deallocate_page(page_id)?;

        inner.page_table.remove(&page_id);
        let frame = &mut inner.frames[frame_id];
        {
            let mut page_guard = frame.page.write();
            page_guard.reset_memory();
            page_guard.page_id = INVALID_PAGE_ID;
        }
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;
        frame.pin_count = 0;

        self.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of frames currently eligible for eviction
    pub fn replacer_size(&self) -> usize {
        self.replacer.size()
    }

    /// Pick a frame to hold a new resident page: the free list first, then
    /// an LRU victim.
    fn find_free_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        self.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)
    }

    /// Retire whatever the frame currently holds (writing it back if dirty),
    /// then rebind the frame to `new_page_id` with zeroed contents.
    fn evict_and_install(
        &self,
        inner: &mut PoolInner,
        frame_id: FrameId,
        new_page_id: PageId,
    ) -> Result<(), BufferPoolError> {
        let old_page_id = inner.frames[frame_id].page_id;

        if inner.frames[frame_id].is_dirty {
            let frame = &inner.frames[frame_id];
            let page_guard = frame.page.read();
            self.disk_manager.write_page(&page_guard)?;
            debug!("evicted dirty page {} from frame {}", old_page_id, frame_id);
        }

        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        if new_page_id != INVALID_PAGE_ID {
            inner.page_table.insert(new_page_id, frame_id);
        }

        let frame = &mut inner.frames[frame_id];
        {
            let mut page_guard = frame.page.write();
            page_guard.reset_memory();
            page_guard.page_id = new_page_id;
        }
        frame.page_id = new_page_id;
        frame.is_dirty = false;
        frame.pin_count = 0;

        Ok(())
    }
}
