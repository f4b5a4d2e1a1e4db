//! Buffer manager: the pinned-page access layer over pool and disk.
//!
//! Every page access in this crate goes through `BufMgr`. The contract:
//! `read_page`/`alloc_page` pin, `unpin_page` must be called exactly once
//! per pin with `dirty = true` iff the bytes were modified, and
//! `flush_file` writes a file's dirty resident pages to disk.

use crate::disk::DiskManager;
use oxbow_buffer::{BufferFrame, BufferPool, BufferPoolStats, EvictedPage};
use oxbow_common::config::StorageConfig;
use oxbow_common::page::{FileId, PageId, PageNo};
use oxbow_common::{OxbowError, Result};

/// Buffer manager combining the buffer pool with the disk manager.
pub struct BufMgr {
    pool: BufferPool,
    disk: DiskManager,
}

impl BufMgr {
    /// Creates a buffer manager from storage configuration.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            pool: BufferPool::new(config.buffer_pool_frames),
            disk: DiskManager::new(config)?,
        })
    }

    /// Creates a buffer manager from existing parts.
    pub fn with_parts(disk: DiskManager, pool: BufferPool) -> Self {
        Self { pool, disk }
    }

    // =========================================================================
    // File management
    // =========================================================================

    /// Creates a new paged file.
    pub fn create_file(&self, name: &str) -> Result<FileId> {
        self.disk.create_file(name)
    }

    /// Opens an existing paged file; `FileNotFound` if absent.
    pub fn open_file(&self, name: &str) -> Result<FileId> {
        self.disk.open_file(name)
    }

    /// Deletes a file, dropping any of its resident pages first.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        if let Some(file_id) = self.disk.file_id(name) {
            self.pool.discard_pages(|pid| pid.file_id == file_id);
        }
        self.disk.delete_file(name)?;
        Ok(())
    }

    /// Returns the first allocated page number of a file.
    pub fn first_page_no(&self, file_id: FileId) -> Result<PageNo> {
        self.disk.first_page_no(file_id)
    }

    /// Returns the number of page slots in a file (reserved slot included).
    pub fn num_pages(&self, file_id: FileId) -> Result<u32> {
        self.disk.num_pages(file_id)
    }

    // =========================================================================
    // Page access
    // =========================================================================

    /// Pins a page and returns its frame, reading it from disk on a miss.
    pub fn read_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        self.write_back(evicted)?;
        Ok(frame)
    }

    /// Allocates a fresh page in a file and pins its zeroed frame.
    pub fn alloc_page(&self, file_id: FileId) -> Result<(PageId, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (frame, evicted) = self.pool.new_page(page_id)?;
        self.write_back(evicted)?;
        Ok((page_id, frame))
    }

    /// Releases one pin on a page.
    ///
    /// `dirty = true` iff the page bytes were modified while pinned. Fails
    /// with `PageNotPinned` if the page holds no pin, which callers on
    /// teardown paths are expected to swallow.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        if self.pool.unpin_page(page_id, dirty) {
            Ok(())
        } else {
            Err(OxbowError::PageNotPinned {
                page_no: page_id.page_no,
            })
        }
    }

    /// Writes every dirty resident page of a file to disk and syncs it.
    pub fn flush_file(&self, file_id: FileId) -> Result<()> {
        self.pool.flush_pages(
            |pid| pid.file_id == file_id,
            |pid, data| self.disk.write_page(pid, data),
        )?;
        self.disk.sync_file(file_id)
    }

    /// Returns buffer pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }
}
