//! Buffer pool management for OxbowDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock eviction policy driven by pin counts
//! - Pin counting with exactly-once release semantics
//! - Dirty page tracking for write-back

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use page_table::PageTable;
pub use pool::{BufferPool, BufferPoolStats, EvictedPage};
pub use replacer::{ClockReplacer, Replacer};
