use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, Page, PageId, INVALID_PAGE_ID};

/// Number of directory slots; grows in powers of two up to this bound
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

/// Largest supported global depth (`1 << 9 == DIRECTORY_ARRAY_SIZE`)
pub const MAX_GLOBAL_DEPTH: u32 = 9;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = 12;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

#[derive(Error, Debug)]
pub enum IntegrityViolation {
    #[error("local depth {local_depth} at index {index} exceeds global depth {global_depth}")]
    DepthBound {
        index: usize,
        local_depth: u8,
        global_depth: u32,
    },
    #[error("bucket page {page_id} is referenced by {actual} entries, expected {expected}")]
    ReferenceCount {
        page_id: PageId,
        expected: usize,
        actual: usize,
    },
    #[error("entries {a} and {b} share bucket page {page_id} but disagree on local depth")]
    DepthMismatch { a: usize, b: usize, page_id: PageId },
}

/// Directory page of the extendible hash index.
///
/// On-page layout:
///
/// ```text
/// | page_id (4) | lsn (4) | global_depth (4) | local_depths (512) | bucket_page_ids (2048) |
/// ```
///
/// Decoded into memory with [`DirectoryPage::load`], written back with
/// [`DirectoryPage::store`].
pub struct DirectoryPage {
    page_id: PageId,
    lsn: Lsn,
    global_depth: u32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl DirectoryPage {
    /// Fresh directory of depth zero
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            lsn: 0,
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Decode a directory from page bytes
    pub fn load(page: &Page) -> Self {
        let mut dir = Self::new(INVALID_PAGE_ID);
        dir.page_id = LittleEndian::read_i32(&page.data[PAGE_ID_OFFSET..]);
        dir.lsn = LittleEndian::read_u32(&page.data[LSN_OFFSET..]);
        dir.global_depth = LittleEndian::read_u32(&page.data[GLOBAL_DEPTH_OFFSET..]);
        dir.local_depths
            .copy_from_slice(&page.data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]);
        for (i, chunk) in page.data
            [BUCKET_PAGE_IDS_OFFSET..BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE]
            .chunks_exact(4)
            .enumerate()
        {
            dir.bucket_page_ids[i] = LittleEndian::read_i32(chunk);
        }
        dir
    }

    /// Encode the directory back into page bytes
    pub fn store(&self, page: &mut Page) {
        LittleEndian::write_i32(&mut page.data[PAGE_ID_OFFSET..], self.page_id);
        LittleEndian::write_u32(&mut page.data[LSN_OFFSET..], self.lsn);
        LittleEndian::write_u32(&mut page.data[GLOBAL_DEPTH_OFFSET..], self.global_depth);
        page.data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]
            .copy_from_slice(&self.local_depths);
        for (i, chunk) in page.data
            [BUCKET_PAGE_IDS_OFFSET..BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE]
            .chunks_exact_mut(4)
            .enumerate()
        {
            LittleEndian::write_i32(chunk, self.bucket_page_ids[i]);
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth) - 1
    }

    /// Double the directory. Every new entry mirrors the one whose index
    /// differs only in the new top bit, so all aliases stay consistent.
    pub fn incr_global_depth(&mut self) {
        debug_assert!(self.global_depth < MAX_GLOBAL_DEPTH);
        let old_size = self.size();
        for i in 0..old_size {
            self.local_depths[old_size + i] = self.local_depths[i];
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
        }
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.global_depth > 0);
        self.global_depth -= 1;
    }

    /// Number of live directory entries
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        self.local_depths[index] as u32
    }

    pub fn set_local_depth(&mut self, index: usize, depth: u32) {
        self.local_depths[index] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, index: usize) {
        self.local_depths[index] += 1;
    }

    pub fn decr_local_depth(&mut self, index: usize) {
        debug_assert!(self.local_depths[index] > 0);
        self.local_depths[index] -= 1;
    }

    pub fn local_depth_mask(&self, index: usize) -> u32 {
        (1 << self.local_depth(index)) - 1
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        self.bucket_page_ids[index]
    }

    pub fn set_bucket_page_id(&mut self, index: usize, bucket_page_id: PageId) {
        self.bucket_page_ids[index] = bucket_page_id;
    }

    /// Index that differs from `index` only in the top bit of its
    /// local-depth prefix. Requires a local depth of at least one.
    pub fn split_image_index(&self, index: usize) -> usize {
        debug_assert!(self.local_depth(index) >= 1);
        index ^ (1 << (self.local_depth(index) - 1))
    }

    /// The directory may halve iff no bucket uses every global-depth bit
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth)
    }

    /// Cross-check the extendible-hashing invariants over all live entries
    pub fn verify_integrity(&self) -> Result<(), IntegrityViolation> {
        // page id -> (reference count, local depth, first index seen)
        let mut seen: HashMap<PageId, (usize, u8, usize)> = HashMap::new();

        for i in 0..self.size() {
            let depth = self.local_depths[i];
            if depth as u32 > self.global_depth {
                return Err(IntegrityViolation::DepthBound {
                    index: i,
                    local_depth: depth,
                    global_depth: self.global_depth,
                });
            }

            let page_id = self.bucket_page_ids[i];
            let entry = seen.entry(page_id).or_insert((0, depth, i));
            if entry.1 != depth {
                return Err(IntegrityViolation::DepthMismatch {
                    a: entry.2,
                    b: i,
                    page_id,
                });
            }
            entry.0 += 1;
        }

        for (&page_id, &(count, depth, _)) in &seen {
            let expected = 1usize << (self.global_depth - depth as u32);
            if count != expected {
                return Err(IntegrityViolation::ReferenceCount {
                    page_id,
                    expected,
                    actual: count,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_roundtrip() {
        let mut dir = DirectoryPage::new(3);
        dir.incr_global_depth();
        dir.set_bucket_page_id(0, 7);
        dir.set_bucket_page_id(1, 9);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);

        let mut page = Page::new(3);
        dir.store(&mut page);
        let loaded = DirectoryPage::load(&page);

        assert_eq!(loaded.page_id(), 3);
        assert_eq!(loaded.global_depth(), 1);
        assert_eq!(loaded.bucket_page_id(0), 7);
        assert_eq!(loaded.bucket_page_id(1), 9);
        assert_eq!(loaded.local_depth(1), 1);
    }

    #[test]
    fn test_masks_and_split_image() {
        let mut dir = DirectoryPage::new(0);
        dir.incr_global_depth();
        dir.incr_global_depth();
        assert_eq!(dir.global_depth_mask(), 0b11);
        assert_eq!(dir.size(), 4);

        dir.set_local_depth(1, 2);
        assert_eq!(dir.local_depth_mask(1), 0b11);
        assert_eq!(dir.split_image_index(1), 0b11);

        dir.set_local_depth(2, 1);
        assert_eq!(dir.split_image_index(2), 0b11);
    }

    #[test]
    fn test_can_shrink() {
        let mut dir = DirectoryPage::new(0);
        assert!(!dir.can_shrink());

        dir.incr_global_depth();
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        assert!(!dir.can_shrink());

        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        assert!(dir.can_shrink());
    }

    #[test]
    fn test_verify_integrity_detects_bad_counts() {
        let mut dir = DirectoryPage::new(0);
        dir.set_bucket_page_id(0, 5);
        assert!(dir.verify_integrity().is_ok());

        dir.incr_global_depth();
        dir.set_bucket_page_id(1, 6);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        assert!(dir.verify_integrity().is_ok());

        // Entry 1 claims depth 1 but shares page 5 with entry 0
        dir.set_bucket_page_id(1, 5);
        assert!(dir.verify_integrity().is_err());
    }
}
