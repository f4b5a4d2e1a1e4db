//! Storage engine for OxbowDB.
//!
//! This crate provides:
//! - Disk manager for page-level I/O against named files
//! - Buffer manager facade enforcing the pin/unpin discipline
//! - Relation heap file for variable-length records, with a forward scanner
//! - Disk-resident B+Tree index over an integer record attribute

mod bufmgr;
mod disk;

pub mod btree;
pub mod relation;

pub use bufmgr::BufMgr;
pub use btree::{BTreeIndex, IndexMetaInfo, INTERNAL_CAPACITY, LEAF_CAPACITY};
pub use disk::DiskManager;
pub use relation::{FileScan, RelationFile};
