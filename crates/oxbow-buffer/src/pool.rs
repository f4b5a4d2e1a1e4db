//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use oxbow_common::page::{PageId, PAGE_SIZE};
use oxbow_common::{OxbowError, Result};
use parking_lot::Mutex;
use sysinfo::System;

/// A dirty page that was evicted from the buffer pool.
///
/// The caller must write it to disk before reusing the frame's contents,
/// or the modification is lost.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page to frame mapping
/// - Free frame list for unused frames
/// - Clock replacement for eviction
/// - Pin counting to keep in-use pages resident
pub struct BufferPool {
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page to frame mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on low-memory systems.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let target_bytes = sys.available_memory() as usize / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(num_frames)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Returns true if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Fetches a resident page, pinning it.
    ///
    /// Returns None if the page is not in the pool; the caller is expected
    /// to load it from disk via `load_page`.
    #[inline]
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Claims a frame for a new page, evicting if necessary.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        // Evict: only unpinned frames holding a page are candidates.
        let victim_id = self
            .replacer
            .evict(&|fid| {
                let frame = &self.frames[fid.0 as usize];
                frame.page_id().is_some() && frame.pin_count() == 0
            })
            .ok_or(OxbowError::BufferPoolFull)?;

        let frame = &self.frames[victim_id.0 as usize];

        // Hand any dirty contents back to the caller for write-back.
        let evicted = if frame.is_dirty() {
            frame.page_id().map(|page_id| {
                let mut data = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut data);
                EvictedPage { page_id, data }
            })
        } else {
            None
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.remove(old_page_id);
        }

        Ok((victim_id, evicted))
    }

    /// Installs a new page in the pool, pinned, with zeroed contents.
    ///
    /// If the page is already resident the existing frame is pinned and
    /// returned instead. The second element is any evicted dirty page the
    /// caller must write to disk.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Loads page bytes read from disk into the pool, pinned.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Releases one pin on a page.
    ///
    /// `dirty = true` marks the page for write-back. Returns false if the
    /// page is not resident or not pinned, so callers can surface the
    /// pin-discipline violation.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let Some(frame_id) = self.page_table.get(page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        if dirty {
            frame.set_dirty(true);
        }
        frame.unpin()
    }

    /// Writes every dirty page accepted by `filter` through `sink` and
    /// clears its dirty flag. Returns the number of pages flushed.
    pub fn flush_pages<P, F>(&self, filter: P, mut sink: F) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let mut flushed = 0;
        for (page_id, frame_id) in self.page_table.snapshot() {
            if !filter(page_id) {
                continue;
            }
            let frame = &self.frames[frame_id.0 as usize];
            if !frame.is_dirty() {
                continue;
            }
            {
                let data = frame.read_data();
                sink(page_id, &**data)?;
            }
            frame.set_dirty(false);
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Drops a page from the pool without writing it back.
    ///
    /// Returns false if the page is pinned or not resident.
    pub fn discard_page(&self, page_id: PageId) -> bool {
        let Some(frame_id) = self.page_table.remove(page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_pinned() {
            self.page_table.insert(page_id, frame_id);
            return false;
        }

        self.replacer.remove(frame_id);
        frame.reset();
        self.free_list.lock().push(frame_id);
        true
    }

    /// Drops every unpinned page accepted by `filter` without write-back.
    ///
    /// Used when a file is deleted: its pages must not linger in the pool,
    /// or a later eviction would try to write them to a dead file.
    pub fn discard_pages<P>(&self, filter: P) -> usize
    where
        P: Fn(PageId) -> bool,
    {
        let mut discarded = 0;
        for (page_id, _) in self.page_table.snapshot() {
            if filter(page_id) && self.discard_page(page_id) {
                discarded += 1;
            }
        }
        discarded
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for (_, frame_id) in self.page_table.snapshot() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.frames.len(),
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_new() {
        let pool = BufferPool::new(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_existing() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let pool = BufferPool::new(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        assert!(frame.is_pinned());

        assert!(pool.unpin_page(page_id, false));
        assert!(!frame.is_pinned());

        // A second release has no pin to match.
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_buffer_pool_unpin_nonresident() {
        let pool = BufferPool::new(10);
        assert!(!pool.unpin_page(PageId::new(0, 99), false));
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_eviction() {
        let pool = BufferPool::new(3);

        for i in 1..=3 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }
        assert_eq!(pool.free_count(), 0);

        // A fourth page evicts a clean one.
        let (_, evicted) = pool.new_page(PageId::new(0, 99)).unwrap();
        assert!(evicted.is_none());
        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(PageId::new(0, 99)));
    }

    #[test]
    fn test_buffer_pool_eviction_dirty() {
        let pool = BufferPool::new(1);
        let page_id1 = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id1).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(page_id1, true);

        let (_, evicted) = pool.new_page(PageId::new(0, 2)).unwrap();

        let evicted = evicted.expect("dirty page must be handed back on eviction");
        assert_eq!(evicted.page_id, page_id1);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let pool = BufferPool::new(2);

        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(OxbowError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_load_page() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);
        let data = [0xABu8; PAGE_SIZE];

        let (frame, _) = pool.load_page(page_id, &data).unwrap();

        let frame_data = frame.read_data();
        assert_eq!(frame_data[0], 0xAB);
        assert_eq!(frame_data[PAGE_SIZE - 1], 0xAB);
    }

    #[test]
    fn test_buffer_pool_flush_pages() {
        let pool = BufferPool::new(10);

        for i in 1..=5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, i % 2 == 1);
        }

        let mut flushed_pages = vec![];
        let flushed = pool
            .flush_pages(
                |pid| pid.file_id == 0,
                |pid, _data| {
                    flushed_pages.push(pid);
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(flushed, 3);
        assert_eq!(flushed_pages.len(), 3);
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_buffer_pool_flush_filter() {
        let pool = BufferPool::new(10);

        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.unpin_page(PageId::new(0, 1), true);
        pool.new_page(PageId::new(1, 1)).unwrap();
        pool.unpin_page(PageId::new(1, 1), true);

        let flushed = pool
            .flush_pages(|pid| pid.file_id == 1, |_, _| Ok(()))
            .unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(pool.stats().dirty_frames, 1);
    }

    #[test]
    fn test_buffer_pool_discard_page() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();

        // Still pinned: refuse.
        assert!(!pool.discard_page(page_id));
        pool.unpin_page(page_id, false);

        assert!(pool.discard_page(page_id));
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = BufferPool::new(10);

        for i in 1..=4 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true);
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.used_frames, 4);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 2);
    }

    #[test]
    fn test_buffer_pool_duplicate_new_page() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let (frame, evicted) = pool.new_page(page_id).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(pool.page_count(), 1);
    }
}
