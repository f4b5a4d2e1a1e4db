//! Disk-resident B+Tree index over an integer record attribute.
//!
//! The index is a single paged file: a meta page holding configuration and
//! the current root page number, plus node pages that are each either a
//! leaf or an internal node. Leaves hold `(key, rid)` pairs and are linked
//! through right-sibling pointers for range scans; internal nodes hold
//! separator keys and child page numbers.
//!
//! Node pages begin with a 4-byte discriminator so any page can be
//! classified without prior knowledge. Capacities are compile-time
//! constants chosen so one node fills one page.

pub mod constants;
pub mod index;
pub mod meta;
pub mod node;

pub use constants::{INTERNAL_CAPACITY, LEAF_CAPACITY};
pub use index::BTreeIndex;
pub use meta::IndexMetaInfo;
pub use node::{InternalNode, LeafNode};
