//! Forward scan over all records of a relation file.

use crate::bufmgr::BufMgr;
use crate::disk::FIRST_PAGE_NO;
use crate::relation::page::RelationPage;
use bytes::Bytes;
use oxbow_common::page::{FileId, PageId, PageNo};
use oxbow_common::types::RecordId;
use oxbow_common::Result;
use std::sync::Arc;

/// Iterates over every record of a relation file in storage order.
///
/// `next_record` returns `Ok(None)` once the file is exhausted; that is the
/// normal terminator of an index build, not a fault. The page being read is
/// pinned only for the duration of the copy.
pub struct FileScan {
    buf: Arc<BufMgr>,
    file_id: FileId,
    current_page_no: PageNo,
    current_slot: u16,
}

impl FileScan {
    /// Opens a scan over the named relation.
    pub fn new(relation_name: &str, buf: Arc<BufMgr>) -> Result<Self> {
        let file_id = buf.open_file(relation_name)?;
        Ok(Self {
            buf,
            file_id,
            current_page_no: FIRST_PAGE_NO,
            current_slot: 0,
        })
    }

    /// Returns the next `(rid, record bytes)` pair, or None at end of file.
    pub fn next_record(&mut self) -> Result<Option<(RecordId, Bytes)>> {
        loop {
            let num_pages = self.buf.num_pages(self.file_id)?;
            if self.current_page_no >= num_pages {
                return Ok(None);
            }

            let page_id = PageId::new(self.file_id, self.current_page_no);
            let frame = self.buf.read_page(page_id)?;
            let record = {
                let data = frame.read_data();
                RelationPage::record_at(&data[..], self.current_slot)
                    .map(Bytes::copy_from_slice)
            };
            self.buf.unpin_page(page_id, false)?;

            match record {
                Some(bytes) => {
                    let rid = RecordId::new(self.current_page_no, self.current_slot);
                    self.current_slot += 1;
                    return Ok(Some((rid, bytes)));
                }
                None => {
                    self.current_page_no += 1;
                    self.current_slot = 0;
                }
            }
        }
    }
}
