//! Relation file: append-oriented storage of variable-length records.

use crate::bufmgr::BufMgr;
use crate::relation::page::RelationPage;
use oxbow_common::page::{FileId, PageId};
use oxbow_common::types::RecordId;
use oxbow_common::{OxbowError, Result};
use std::sync::Arc;

/// A relation file holding base records.
///
/// Records are opaque byte strings appended into slotted pages; a record's
/// `RecordId` is its `(page_no, slot_no)` address. Data pages start at page
/// number 1, so the sentinel rid `(0, 0)` can never be produced.
pub struct RelationFile {
    buf: Arc<BufMgr>,
    file_id: FileId,
    name: String,
}

impl RelationFile {
    /// Creates a new, empty relation file.
    pub fn create(name: &str, buf: Arc<BufMgr>) -> Result<Self> {
        let file_id = buf.create_file(name)?;
        Ok(Self {
            buf,
            file_id,
            name: name.to_string(),
        })
    }

    /// Opens an existing relation file.
    pub fn open(name: &str, buf: Arc<BufMgr>) -> Result<Self> {
        let file_id = buf.open_file(name)?;
        Ok(Self {
            buf,
            file_id,
            name: name.to_string(),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying file id.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Appends a record and returns its address.
    ///
    /// Tries the last page first and allocates a fresh page when the record
    /// does not fit. Records larger than one page are rejected with
    /// `InsufficientSpace`.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        let num_pages = self.buf.num_pages(self.file_id)?;

        if num_pages > 1 {
            let page_no = num_pages - 1;
            let page_id = PageId::new(self.file_id, page_no);
            let frame = self.buf.read_page(page_id)?;
            let inserted = {
                let mut data = frame.write_data();
                RelationPage::insert_record(&mut data[..], record)
            };
            match inserted {
                Ok(slot_no) => {
                    self.buf.unpin_page(page_id, true)?;
                    return Ok(RecordId::new(page_no, slot_no));
                }
                Err(OxbowError::InsufficientSpace { .. }) => {
                    self.buf.unpin_page(page_id, false)?;
                }
                Err(e) => {
                    self.buf.unpin_page(page_id, false)?;
                    return Err(e);
                }
            }
        }

        let (page_id, frame) = self.buf.alloc_page(self.file_id)?;
        let inserted = {
            let mut data = frame.write_data();
            RelationPage::init(&mut data[..]);
            RelationPage::insert_record(&mut data[..], record)
        };
        match inserted {
            Ok(slot_no) => {
                self.buf.unpin_page(page_id, true)?;
                Ok(RecordId::new(page_id.page_no, slot_no))
            }
            Err(e) => {
                // The fresh page header was written; keep it.
                self.buf.unpin_page(page_id, true)?;
                Err(e)
            }
        }
    }

    /// Flushes the relation file to disk.
    pub fn flush(&self) -> Result<()> {
        self.buf.flush_file(self.file_id)
    }
}
