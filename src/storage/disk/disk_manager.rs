use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
    #[error("Page {0} does not belong to instance {1}")]
    WrongInstance(PageId, u32),
}

/// DiskManager is responsible for handling the actual disk I/O operations.
///
/// When several buffer pool instances share one database file, instance `k`
/// of `n` only ever allocates page ids with `id % n == k`.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: Mutex<PageId>,
    num_instances: u32,
    instance_index: u32,
}

impl DiskManager {
    /// Create a new DiskManager with the specified database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        Self::with_instances(db_path, 1, 0)
    }

    /// Create a DiskManager allocating only the id residue class of one
    /// buffer pool instance
    pub fn with_instances(
        db_path: impl AsRef<Path>,
        num_instances: u32,
        instance_index: u32,
    ) -> Result<Self, DiskManagerError> {
        assert!(num_instances > 0, "at least one instance required");
        assert!(
            instance_index < num_instances,
            "instance index out of range"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)
            .map_err(DiskManagerError::IoError)?;

        // Resume allocation past whatever the file already holds, rounded
        // up to this instance's residue class.
        let pages_on_disk = (file.metadata()?.len() as usize).div_ceil(PAGE_SIZE) as PageId;
        let mut first = pages_on_disk;
        while first as u32 % num_instances != instance_index {
            first += 1;
        }

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: Mutex::new(first),
            num_instances,
            instance_index,
        })
    }

    /// Read a page from disk
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();

            let file_size = file.metadata().map_err(DiskManagerError::IoError)?.len();

            // A page that was allocated but never written reads back as
            // zeroes.
            if offset as u64 >= file_size {
                page.reset_memory();
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))
                .map_err(DiskManagerError::IoError)?;

            file.read_exact(&mut buffer)
                .map_err(DiskManagerError::IoError)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID || page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(DiskManagerError::IoError)?;

        file.write_all(&page.data)
            .map_err(DiskManagerError::IoError)?;

        file.flush().map_err(DiskManagerError::IoError)?;

        Ok(())
    }

    /// Allocate a new page ID.
    ///
    /// Ids grow monotonically with stride `num_instances`; the file itself
    /// is extended lazily on first write.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut next = self.next_page_id.lock();
        let page_id = *next;
        *next += self.num_instances as PageId;
        debug_assert_eq!(page_id as u32 % self.num_instances, self.instance_index);
        Ok(page_id)
    }

    /// Release a page ID.
    ///
    /// The id space is never compacted; the hook only validates ownership.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        if page_id as u32 % self.num_instances != self.instance_index {
            return Err(DiskManagerError::WrongInstance(page_id, self.instance_index));
        }
        debug!("deallocated page {}", page_id);
        Ok(())
    }

    /// Calculate the offset of a page in the file
    fn page_offset(&self, page_id: PageId) -> usize {
        page_id as usize * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_write_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut page = Page::new(page_id);
        page.data[0..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(&read_back.data[0..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(read_back.page_id, page_id);
    }

    #[test]
    fn test_read_past_eof_zero_fills() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut page = Page::new(INVALID_PAGE_ID);
        page.data[7] = 0xff;
        disk.read_page(page_id, &mut page).unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_instance_striding() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::with_instances(file.path(), 4, 1).unwrap();

        let a = disk.allocate_page().unwrap();
        let b = disk.allocate_page().unwrap();
        assert_eq!(a % 4, 1);
        assert_eq!(b, a + 4);
        assert!(disk.deallocate_page(a).is_ok());
        assert!(disk.deallocate_page(a + 1).is_err());
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();
        let mut page = Page::new(INVALID_PAGE_ID);
        assert!(disk.read_page(INVALID_PAGE_ID, &mut page).is_err());
        assert!(disk.write_page(&page).is_err());
    }
}
