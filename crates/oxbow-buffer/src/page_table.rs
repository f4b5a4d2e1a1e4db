//! Page table mapping resident pages to buffer frames.

use crate::frame::FrameId;
use oxbow_common::page::PageId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Maps `PageId` to the frame currently holding that page.
///
/// The engine is single-writer by contract, so a mutex-guarded map is
/// sufficient; the mutex only serializes table maintenance, never page data
/// access.
pub struct PageTable {
    entries: Mutex<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up the frame holding a page.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().get(&page_id).copied()
    }

    /// Inserts or updates a page-to-frame mapping.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.entries.lock().insert(page_id, frame_id);
    }

    /// Removes a mapping. Returns the frame it pointed to, if present.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().remove(&page_id)
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.lock().contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a snapshot of all mappings.
    ///
    /// A snapshot rather than a callback so callers can perform I/O per
    /// entry without holding the table lock.
    pub fn snapshot(&self) -> Vec<(PageId, FrameId)> {
        self.entries
            .lock()
            .iter()
            .map(|(&pid, &fid)| (pid, fid))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 42);

        table.insert(page_id, FrameId(7));
        assert_eq!(table.get(page_id), Some(FrameId(7)));
        assert!(table.contains(page_id));
    }

    #[test]
    fn test_remove() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 42);

        table.insert(page_id, FrameId(7));
        assert_eq!(table.remove(page_id), Some(FrameId(7)));
        assert_eq!(table.get(page_id), None);
        assert_eq!(table.remove(page_id), None);
    }

    #[test]
    fn test_update_existing() {
        let table = PageTable::new(16);
        let page_id = PageId::new(1, 5);

        table.insert(page_id, FrameId(1));
        table.insert(page_id, FrameId(2));

        assert_eq!(table.get(page_id), Some(FrameId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_snapshot() {
        let table = PageTable::new(16);
        assert!(table.is_empty());

        table.insert(PageId::new(0, 1), FrameId(1));
        table.insert(PageId::new(0, 2), FrameId(2));
        table.insert(PageId::new(1, 1), FrameId(3));

        let mut snapshot = table.snapshot();
        snapshot.sort_by_key(|(pid, _)| pid.as_u64());
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0], (PageId::new(0, 1), FrameId(1)));
    }
}
