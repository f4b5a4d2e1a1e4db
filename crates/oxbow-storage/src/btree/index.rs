//! B+Tree index over an integer attribute of a relation.
//!
//! The index maps a 4-byte integer read at a fixed offset of each relation
//! record to that record's id, and serves bounded range scans. One index
//! instance has exclusive logical access to its file.

use crate::btree::constants::{INTERNAL_CAPACITY, LEAF_CAPACITY};
use crate::btree::meta::IndexMetaInfo;
use crate::btree::node::{self, InternalNode, LeafNode};
use crate::bufmgr::BufMgr;
use crate::relation::FileScan;
use oxbow_common::page::{FileId, PageId, PageNo, INVALID_PAGE_NO};
use oxbow_common::types::{Datatype, Operator, RecordId};
use oxbow_common::{OxbowError, Result};
use std::sync::Arc;

/// State of an in-progress range scan.
///
/// The current leaf stays pinned between calls; a page number of 0 means
/// the sibling chain is exhausted and nothing is pinned.
struct ScanState {
    current_page_no: PageNo,
    next_entry: usize,
    high_val: i32,
    high_op: Operator,
}

/// A disk-resident B+Tree index.
pub struct BTreeIndex {
    buf: Arc<BufMgr>,
    file_id: FileId,
    index_name: String,
    header_page_no: PageNo,
    root_page_no: PageNo,
    attr_byte_offset: usize,
    attr_type: Datatype,
    scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Opens or builds the index for `relation_name` on the integer
    /// attribute at `attr_byte_offset`.
    ///
    /// The index file is named `"<relation>.<attrByteOffset>"`; the derived
    /// name is returned alongside the index. If the file exists its meta
    /// page must agree with the caller's parameters (`BadIndexInfo`
    /// otherwise) and the stored root is adopted. If it does not exist the
    /// file is created with a meta page and an empty root, and every record
    /// of the relation is inserted; the end of the relation triggers a
    /// flush.
    pub fn new(
        relation_name: &str,
        buf: Arc<BufMgr>,
        attr_byte_offset: usize,
        attr_type: Datatype,
    ) -> Result<(Self, String)> {
        let index_name = format!("{}.{}", relation_name, attr_byte_offset);

        match buf.open_file(&index_name) {
            Ok(file_id) => {
                let header_page_no = buf.first_page_no(file_id)?;
                let header_pid = PageId::new(file_id, header_page_no);
                let frame = buf.read_page(header_pid)?;
                let meta = {
                    let data = frame.read_data();
                    IndexMetaInfo::read_from(&data[..])
                };
                buf.unpin_page(header_pid, false)?;
                let meta = meta?;

                if meta.relation_name != relation_name
                    || meta.attr_type != attr_type
                    || meta.attr_byte_offset as usize != attr_byte_offset
                {
                    return Err(OxbowError::BadIndexInfo(index_name));
                }

                let index = Self {
                    buf,
                    file_id,
                    index_name: index_name.clone(),
                    header_page_no,
                    root_page_no: meta.root_page_no,
                    attr_byte_offset,
                    attr_type,
                    scan: None,
                };
                Ok((index, index_name))
            }
            Err(OxbowError::FileNotFound(_)) => {
                let file_id = buf.create_file(&index_name)?;
                let (header_pid, header_frame) = buf.alloc_page(file_id)?;
                let (root_pid, root_frame) = buf.alloc_page(file_id)?;

                {
                    let mut data = root_frame.write_data();
                    InternalNode::init(&mut data[..], 0, INVALID_PAGE_NO);
                }
                let meta = IndexMetaInfo::new(
                    relation_name,
                    attr_byte_offset as u32,
                    attr_type,
                    root_pid.page_no,
                )?;
                {
                    let mut data = header_frame.write_data();
                    meta.write_to(&mut data[..]);
                }
                buf.unpin_page(header_pid, true)?;
                buf.unpin_page(root_pid, true)?;

                let mut index = Self {
                    buf: Arc::clone(&buf),
                    file_id,
                    index_name: index_name.clone(),
                    header_page_no: header_pid.page_no,
                    root_page_no: root_pid.page_no,
                    attr_byte_offset,
                    attr_type,
                    scan: None,
                };

                let mut scan = FileScan::new(relation_name, buf)?;
                while let Some((rid, record)) = scan.next_record()? {
                    let key_bytes = record.get(attr_byte_offset..).ok_or_else(|| {
                        OxbowError::Internal(format!(
                            "record {} is shorter than the attribute offset",
                            rid
                        ))
                    })?;
                    index.insert_entry(key_bytes, rid)?;
                }
                index.buf.flush_file(file_id)?;

                Ok((index, index_name))
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the derived index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the current root page number.
    pub fn root_page_no(&self) -> PageNo {
        self.root_page_no
    }

    /// Returns the indexed attribute's type.
    pub fn attr_type(&self) -> Datatype {
        self.attr_type
    }

    /// Returns the indexed attribute's byte offset.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    #[inline]
    fn pid(&self, page_no: PageNo) -> PageId {
        PageId::new(self.file_id, page_no)
    }

    fn decode_key(key_bytes: &[u8]) -> Result<i32> {
        let bytes: [u8; 4] = key_bytes
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                OxbowError::Internal("index key requires at least 4 record bytes".to_string())
            })?;
        Ok(i32::from_le_bytes(bytes))
    }

    // =========================================================================
    // Insert path
    // =========================================================================

    /// Inserts one `(key, rid)` entry.
    ///
    /// `key_bytes` points at the attribute inside the caller's record; a
    /// 4-byte little-endian integer is read from it.
    pub fn insert_entry(&mut self, key_bytes: &[u8], rid: RecordId) -> Result<()> {
        let key = Self::decode_key(key_bytes)?;
        let buf = Arc::clone(&self.buf);

        enum Step {
            Leaf,
            Bootstrap,
            Child(PageNo),
        }

        // Descend from the root, remembering the internal path for split
        // propagation. Each node is released before its child is pinned.
        let mut path: Vec<PageNo> = Vec::new();
        let mut current = self.root_page_no;
        loop {
            let pid = self.pid(current);
            let frame = buf.read_page(pid)?;
            let step = {
                let data = frame.read_data();
                if node::is_leaf(&data[..]) {
                    Step::Leaf
                } else if InternalNode::key_count(&data[..]) == 0 {
                    Step::Bootstrap
                } else {
                    let idx = InternalNode::child_index(&data[..], key);
                    Step::Child(InternalNode::child_at(&data[..], idx))
                }
            };
            match step {
                Step::Leaf => {
                    buf.unpin_page(pid, false)?;
                    break;
                }
                Step::Bootstrap => {
                    // Only the freshly created root is empty.
                    buf.unpin_page(pid, false)?;
                    return self.bootstrap_root(key, rid);
                }
                Step::Child(child) => {
                    buf.unpin_page(pid, false)?;
                    path.push(current);
                    current = child;
                }
            }
        }

        self.insert_into_leaf(&mut path, current, key, rid)
    }

    /// First insert into a fresh tree: the empty root gains two leaves and
    /// a single seed separator of `key + 1`, so the strict-less routing
    /// rule sends the inserted key into the left leaf.
    fn bootstrap_root(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let buf = Arc::clone(&self.buf);
        let root_no = self.root_page_no;

        let (left_pid, left_frame) = buf.alloc_page(self.file_id)?;
        let (right_pid, right_frame) = buf.alloc_page(self.file_id)?;

        {
            let mut data = left_frame.write_data();
            LeafNode::init(&mut data[..], root_no, right_pid.page_no);
            LeafNode::insert_at(&mut data[..], 0, key, rid);
        }
        {
            let mut data = right_frame.write_data();
            LeafNode::init(&mut data[..], root_no, INVALID_PAGE_NO);
        }

        let root_pid = self.pid(root_no);
        let root_frame = buf.read_page(root_pid)?;
        {
            let mut data = root_frame.write_data();
            InternalNode::set_level(&mut data[..], 1);
            InternalNode::set_key_at(&mut data[..], 0, key.saturating_add(1));
            InternalNode::set_child_at(&mut data[..], 0, left_pid.page_no);
            InternalNode::set_child_at(&mut data[..], 1, right_pid.page_no);
            InternalNode::set_key_count(&mut data[..], 1);
        }

        buf.unpin_page(left_pid, true)?;
        buf.unpin_page(right_pid, true)?;
        buf.unpin_page(root_pid, true)?;
        Ok(())
    }

    fn insert_into_leaf(
        &mut self,
        path: &mut Vec<PageNo>,
        leaf_no: PageNo,
        key: i32,
        rid: RecordId,
    ) -> Result<()> {
        let buf = Arc::clone(&self.buf);
        let leaf_pid = self.pid(leaf_no);
        let frame = buf.read_page(leaf_pid)?;

        {
            let mut data = frame.write_data();
            if LeafNode::key_count(&data[..]) < LEAF_CAPACITY {
                let slot = LeafNode::upper_bound(&data[..], key);
                LeafNode::insert_at(&mut data[..], slot, key, rid);
                drop(data);
                return buf.unpin_page(leaf_pid, true);
            }
        }

        // The leaf is full: move its upper half into a fresh right sibling,
        // place the new pair on the side it belongs to, and hand the
        // separator to the parent.
        let (new_pid, new_frame) = buf.alloc_page(self.file_id)?;
        let sep;
        {
            let mut left = frame.write_data();
            let mut right = new_frame.write_data();

            LeafNode::init(
                &mut right[..],
                node::parent(&left[..]),
                LeafNode::right_sibling(&left[..]),
            );
            sep = LeafNode::split(&mut left[..], &mut right[..]);
            LeafNode::set_right_sibling(&mut left[..], new_pid.page_no);

            if key < sep {
                let slot = LeafNode::upper_bound(&left[..], key);
                LeafNode::insert_at(&mut left[..], slot, key, rid);
            } else {
                let slot = LeafNode::upper_bound(&right[..], key);
                LeafNode::insert_at(&mut right[..], slot, key, rid);
            }
        }
        buf.unpin_page(leaf_pid, true)?;
        buf.unpin_page(new_pid, true)?;

        self.insert_separator(path, sep, leaf_no, new_pid.page_no)
    }

    /// Bubbles a pending separator up the collected path, splitting full
    /// internal nodes as it goes.
    fn insert_separator(
        &mut self,
        path: &mut Vec<PageNo>,
        mut sep: i32,
        mut left_no: PageNo,
        mut right_no: PageNo,
    ) -> Result<()> {
        let buf = Arc::clone(&self.buf);

        loop {
            let Some(parent_no) = path.pop() else {
                return self.promote_root(sep, left_no, right_no);
            };

            let parent_pid = self.pid(parent_no);
            let frame = buf.read_page(parent_pid)?;

            {
                let mut data = frame.write_data();
                if InternalNode::key_count(&data[..]) < INTERNAL_CAPACITY {
                    let idx = InternalNode::child_index(&data[..], sep);
                    InternalNode::insert_at(&mut data[..], idx, sep, left_no, right_no);
                    drop(data);
                    return buf.unpin_page(parent_pid, true);
                }
            }

            // Split the full parent around its median.
            let (new_pid, new_frame) = buf.alloc_page(self.file_id)?;
            let lifted;
            let moved_children: Vec<PageNo>;
            {
                let mut left = frame.write_data();
                let mut right = new_frame.write_data();

                InternalNode::init(
                    &mut right[..],
                    InternalNode::level(&left[..]),
                    node::parent(&left[..]),
                );
                lifted = InternalNode::split(&mut left[..], &mut right[..]);

                // The pending entry goes to whichever half owns the split
                // child: strictly below the lifted median means the left
                // node, at or above it the right node.
                if sep < lifted {
                    let idx = InternalNode::child_index(&left[..], sep);
                    InternalNode::insert_at(&mut left[..], idx, sep, left_no, right_no);
                } else {
                    let idx = InternalNode::child_index(&right[..], sep);
                    InternalNode::insert_at(&mut right[..], idx, sep, left_no, right_no);
                }

                let count = InternalNode::key_count(&right[..]);
                moved_children = (0..=count)
                    .map(|i| InternalNode::child_at(&right[..], i))
                    .collect();
            }
            buf.unpin_page(parent_pid, true)?;
            buf.unpin_page(new_pid, true)?;

            // Children now owned by the new right node get their
            // back-pointers fixed in one batch.
            for child in moved_children {
                self.set_node_parent(child, new_pid.page_no)?;
            }

            sep = lifted;
            left_no = parent_no;
            right_no = new_pid.page_no;
        }
    }

    /// The root split: allocate a new root above the two halves and record
    /// it on the meta page.
    fn promote_root(&mut self, sep: i32, left_no: PageNo, right_no: PageNo) -> Result<()> {
        let buf = Arc::clone(&self.buf);
        let (root_pid, root_frame) = buf.alloc_page(self.file_id)?;

        let left_pid = self.pid(left_no);
        let left_frame = buf.read_page(left_pid)?;
        let level = {
            let mut data = left_frame.write_data();
            node::set_parent(&mut data[..], root_pid.page_no);
            InternalNode::level(&data[..]) + 1
        };
        buf.unpin_page(left_pid, true)?;

        let right_pid = self.pid(right_no);
        let right_frame = buf.read_page(right_pid)?;
        {
            let mut data = right_frame.write_data();
            node::set_parent(&mut data[..], root_pid.page_no);
        }
        buf.unpin_page(right_pid, true)?;

        {
            let mut data = root_frame.write_data();
            InternalNode::init(&mut data[..], level, INVALID_PAGE_NO);
            InternalNode::set_key_at(&mut data[..], 0, sep);
            InternalNode::set_child_at(&mut data[..], 0, left_no);
            InternalNode::set_child_at(&mut data[..], 1, right_no);
            InternalNode::set_key_count(&mut data[..], 1);
        }
        buf.unpin_page(root_pid, true)?;

        let header_pid = self.pid(self.header_page_no);
        let header_frame = buf.read_page(header_pid)?;
        {
            let mut data = header_frame.write_data();
            IndexMetaInfo::set_root_page_no(&mut data[..], root_pid.page_no);
        }
        buf.unpin_page(header_pid, true)?;

        self.root_page_no = root_pid.page_no;
        Ok(())
    }

    fn set_node_parent(&self, page_no: PageNo, parent: PageNo) -> Result<()> {
        let pid = self.pid(page_no);
        let frame = self.buf.read_page(pid)?;
        {
            let mut data = frame.write_data();
            node::set_parent(&mut data[..], parent);
        }
        self.buf.unpin_page(pid, true)
    }

    // =========================================================================
    // Scan path
    // =========================================================================

    /// Positions a scan cursor on the first entry inside the range.
    ///
    /// `low_op` must be GT or GTE and `high_op` LT or LTE (`BadOpcodes`
    /// otherwise); `low_val` must not exceed `high_val` (`BadScanrange`).
    /// If no entry falls inside the range every pin is released and
    /// `NoSuchKeyFound` is returned.
    pub fn start_scan(
        &mut self,
        low_val: i32,
        low_op: Operator,
        high_val: i32,
        high_op: Operator,
    ) -> Result<()> {
        if !matches!(low_op, Operator::GT | Operator::GTE)
            || !matches!(high_op, Operator::LT | Operator::LTE)
        {
            return Err(OxbowError::BadOpcodes);
        }
        if low_val > high_val {
            return Err(OxbowError::BadScanrange);
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        let buf = Arc::clone(&self.buf);

        // Adopt the root recorded on the meta page.
        let header_pid = self.pid(self.header_page_no);
        let frame = buf.read_page(header_pid)?;
        let root = {
            let data = frame.read_data();
            IndexMetaInfo::root_page_no(&data[..])
        };
        buf.unpin_page(header_pid, false)?;

        enum Step {
            Leaf,
            EmptyTree,
            Child(PageNo),
        }

        // Descend toward the leftmost leaf that can hold the low bound.
        // Exactly one page is pinned at any moment; the pin moves from
        // node to child down the tree.
        let mut current = root;
        let mut frame = buf.read_page(self.pid(current))?;
        loop {
            let step = {
                let data = frame.read_data();
                if node::is_leaf(&data[..]) {
                    Step::Leaf
                } else if InternalNode::key_count(&data[..]) == 0 {
                    Step::EmptyTree
                } else {
                    let idx = InternalNode::child_index(&data[..], low_val);
                    Step::Child(InternalNode::child_at(&data[..], idx))
                }
            };
            match step {
                Step::Leaf => break, // the leaf keeps its pin as the cursor
                Step::EmptyTree => {
                    buf.unpin_page(self.pid(current), false)?;
                    return Err(OxbowError::NoSuchKeyFound);
                }
                Step::Child(child) => {
                    buf.unpin_page(self.pid(current), false)?;
                    current = child;
                    frame = buf.read_page(self.pid(current))?;
                }
            }
        }

        // Find the first slot satisfying the low predicate, hopping right
        // siblings as needed; the leaf under inspection holds the only pin.
        let next_entry = loop {
            let (found, sibling) = {
                let data = frame.read_data();
                let count = LeafNode::key_count(&data[..]);
                let mut found = None;
                for i in 0..count {
                    if LeafNode::rid_at(&data[..], i).is_sentinel() {
                        break;
                    }
                    let k = LeafNode::key_at(&data[..], i);
                    let satisfied = match low_op {
                        Operator::GTE => k >= low_val,
                        _ => k > low_val,
                    };
                    if satisfied {
                        found = Some(i);
                        break;
                    }
                }
                (found, LeafNode::right_sibling(&data[..]))
            };

            match found {
                Some(i) => break i,
                None => {
                    // Nothing qualifies here; move the pin right, or give
                    // up at the end of the chain.
                    buf.unpin_page(self.pid(current), false)?;
                    if sibling == INVALID_PAGE_NO {
                        return Err(OxbowError::NoSuchKeyFound);
                    }
                    current = sibling;
                    frame = buf.read_page(self.pid(current))?;
                }
            }
        };

        // The candidate must also satisfy the high predicate.
        let (k, r) = {
            let data = frame.read_data();
            (
                LeafNode::key_at(&data[..], next_entry),
                LeafNode::rid_at(&data[..], next_entry),
            )
        };
        if r.is_sentinel() || k > high_val || (k == high_val && high_op == Operator::LT) {
            buf.unpin_page(self.pid(current), false)?;
            return Err(OxbowError::NoSuchKeyFound);
        }

        self.scan = Some(ScanState {
            current_page_no: current,
            next_entry,
            high_val,
            high_op,
        });
        Ok(())
    }

    /// Returns the next record id in the range.
    ///
    /// Fails with `ScanNotInitialized` when no scan is active and
    /// `IndexScanCompleted` once the range is exhausted.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let buf = Arc::clone(&self.buf);
        let file_id = self.file_id;
        let scan = self
            .scan
            .as_mut()
            .ok_or(OxbowError::ScanNotInitialized)?;

        if scan.current_page_no == INVALID_PAGE_NO {
            return Err(OxbowError::IndexScanCompleted);
        }

        // The cursor already holds one pin on this leaf; read_page takes a
        // second, call-scoped access pin that every branch below releases.
        let pid = PageId::new(file_id, scan.current_page_no);
        let frame = buf.read_page(pid)?;
        let step = {
            let data = frame.read_data();
            let count = LeafNode::key_count(&data[..]);
            if scan.next_entry >= count {
                None
            } else {
                let k = LeafNode::key_at(&data[..], scan.next_entry);
                let r = LeafNode::rid_at(&data[..], scan.next_entry);
                if r.is_sentinel()
                    || k > scan.high_val
                    || (k == scan.high_val && scan.high_op == Operator::LT)
                {
                    None
                } else {
                    let next = scan.next_entry + 1;
                    let hop =
                        next >= count || LeafNode::rid_at(&data[..], next).is_sentinel();
                    Some((r, hop, LeafNode::right_sibling(&data[..])))
                }
            }
        };

        match step {
            None => {
                // Exhausted. Release the access pin; the cursor pin stays
                // until end_scan.
                buf.unpin_page(pid, false)?;
                Err(OxbowError::IndexScanCompleted)
            }
            Some((rid, false, _)) => {
                scan.next_entry += 1;
                buf.unpin_page(pid, false)?;
                Ok(rid)
            }
            Some((rid, true, sibling)) => {
                // Release the access pin, then the cursor pin: the cursor
                // hands over to the right sibling.
                buf.unpin_page(pid, false)?;
                buf.unpin_page(pid, false)?;
                scan.current_page_no = sibling;
                scan.next_entry = 0;
                if sibling != INVALID_PAGE_NO {
                    buf.read_page(PageId::new(file_id, sibling))?;
                }
                Ok(rid)
            }
        }
    }

    /// Terminates the active scan and releases its pin.
    pub fn end_scan(&mut self) -> Result<()> {
        let scan = self.scan.take().ok_or(OxbowError::ScanNotInitialized)?;
        if scan.current_page_no != INVALID_PAGE_NO {
            self.buf
                .unpin_page(PageId::new(self.file_id, scan.current_page_no), false)?;
        }
        Ok(())
    }

    // =========================================================================
    // Integrity checking
    // =========================================================================

    /// Walks the whole tree verifying its structural invariants: sorted
    /// keys, separator bounds, uniform leaf depth, parent back-pointers,
    /// and a sibling chain that matches left-to-right leaf order.
    pub fn check_consistency(&self) -> Result<()> {
        let mut leaves: Vec<(PageNo, PageNo)> = Vec::new();
        let mut leaf_depth = None;
        self.check_node(
            self.root_page_no,
            INVALID_PAGE_NO,
            None,
            None,
            0,
            &mut leaf_depth,
            &mut leaves,
        )?;

        for pair in leaves.windows(2) {
            let (page, sibling) = pair[0];
            let (next_page, _) = pair[1];
            if sibling != next_page {
                return Err(OxbowError::Internal(format!(
                    "leaf {} links to {} but the next leaf in order is {}",
                    page, sibling, next_page
                )));
            }
        }
        if let Some(&(last, sibling)) = leaves.last() {
            if sibling != INVALID_PAGE_NO {
                return Err(OxbowError::Internal(format!(
                    "rightmost leaf {} does not terminate the chain",
                    last
                )));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        page_no: PageNo,
        expected_parent: PageNo,
        lower: Option<i32>,
        upper: Option<i32>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<(PageNo, PageNo)>,
    ) -> Result<()> {
        let pid = self.pid(page_no);
        let frame = self.buf.read_page(pid)?;

        enum NodeInfo {
            Leaf {
                keys: Vec<i32>,
                parent: PageNo,
                sibling: PageNo,
            },
            Internal {
                keys: Vec<i32>,
                children: Vec<PageNo>,
                parent: PageNo,
            },
        }

        let info = {
            let data = frame.read_data();
            if node::is_leaf(&data[..]) {
                let count = LeafNode::key_count(&data[..]);
                NodeInfo::Leaf {
                    keys: (0..count).map(|i| LeafNode::key_at(&data[..], i)).collect(),
                    parent: node::parent(&data[..]),
                    sibling: LeafNode::right_sibling(&data[..]),
                }
            } else {
                let count = InternalNode::key_count(&data[..]);
                NodeInfo::Internal {
                    keys: (0..count)
                        .map(|i| InternalNode::key_at(&data[..], i))
                        .collect(),
                    children: (0..=count)
                        .map(|i| InternalNode::child_at(&data[..], i))
                        .collect(),
                    parent: node::parent(&data[..]),
                }
            }
        };
        self.buf.unpin_page(pid, false)?;

        match info {
            NodeInfo::Leaf {
                keys,
                parent,
                sibling,
            } => {
                if parent != expected_parent {
                    return Err(OxbowError::Internal(format!(
                        "leaf {} records parent {} but was reached from {}",
                        page_no, parent, expected_parent
                    )));
                }
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(OxbowError::Internal(format!(
                            "leaf {} at depth {} while others are at {}",
                            page_no, depth, d
                        )));
                    }
                    _ => {}
                }
                for pair in keys.windows(2) {
                    if pair[0] > pair[1] {
                        return Err(OxbowError::Internal(format!(
                            "leaf {} keys are not sorted", page_no
                        )));
                    }
                }
                for &key in &keys {
                    if lower.is_some_and(|lo| key < lo) || upper.is_some_and(|hi| key >= hi) {
                        return Err(OxbowError::Internal(format!(
                            "leaf {} holds key {} outside its separator bounds",
                            page_no, key
                        )));
                    }
                }
                leaves.push((page_no, sibling));
                Ok(())
            }
            NodeInfo::Internal {
                keys,
                children,
                parent,
            } => {
                if parent != expected_parent {
                    return Err(OxbowError::Internal(format!(
                        "node {} records parent {} but was reached from {}",
                        page_no, parent, expected_parent
                    )));
                }
                if keys.is_empty() {
                    // Only the root of a never-inserted tree is empty, and
                    // it has no children to visit.
                    if depth != 0 {
                        return Err(OxbowError::Internal(format!(
                            "non-root internal node {} has no keys",
                            page_no
                        )));
                    }
                    return Ok(());
                }
                for pair in keys.windows(2) {
                    if pair[0] >= pair[1] {
                        return Err(OxbowError::Internal(format!(
                            "node {} separators are not strictly increasing",
                            page_no
                        )));
                    }
                }
                for &key in &keys {
                    if lower.is_some_and(|lo| key < lo) || upper.is_some_and(|hi| key > hi) {
                        return Err(OxbowError::Internal(format!(
                            "node {} separator {} outside its bounds",
                            page_no, key
                        )));
                    }
                }
                for (i, &child) in children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
                    let child_upper = if i == keys.len() { upper } else { Some(keys[i]) };
                    self.check_node(
                        child,
                        page_no,
                        child_lower,
                        child_upper,
                        depth + 1,
                        leaf_depth,
                        leaves,
                    )?;
                }
                Ok(())
            }
        }
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // A scan pin may already have been released on a failure path;
        // PageNotPinned is swallowed here.
        if self.scan.is_some() {
            let _ = self.end_scan();
        }
        let _ = self.buf.flush_file(self.file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::RelationFile;
    use oxbow_common::config::StorageConfig;
    use tempfile::tempdir;

    fn create_test_bufmgr() -> (Arc<BufMgr>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            buffer_pool_frames: 64,
            fsync_enabled: false,
        };
        (Arc::new(BufMgr::new(&config).unwrap()), dir)
    }

    fn record_for(key: i32) -> Vec<u8> {
        let mut record = vec![0u8; 16];
        record[..4].copy_from_slice(&key.to_le_bytes());
        record
    }

    fn build_relation(buf: &Arc<BufMgr>, name: &str, keys: &[i32]) {
        let rel = RelationFile::create(name, Arc::clone(buf)).unwrap();
        for &key in keys {
            rel.insert_record(&record_for(key)).unwrap();
        }
        rel.flush().unwrap();
    }

    #[test]
    fn test_index_name_derivation() {
        let (buf, _dir) = create_test_bufmgr();
        build_relation(&buf, "relA", &[1, 2, 3]);

        let (index, name) =
            BTreeIndex::new("relA", Arc::clone(&buf), 0, Datatype::Integer).unwrap();
        assert_eq!(name, "relA.0");
        assert_eq!(index.index_name(), "relA.0");
        assert_eq!(buf.stats().pinned_frames, 0);
    }

    #[test]
    fn test_build_and_scan_small() {
        let (buf, _dir) = create_test_bufmgr();
        build_relation(&buf, "relA", &[5, 1, 9, 3, 7]);

        let (mut index, _) =
            BTreeIndex::new("relA", Arc::clone(&buf), 0, Datatype::Integer).unwrap();
        index.check_consistency().unwrap();

        index
            .start_scan(1, Operator::GTE, 9, Operator::LTE)
            .unwrap();
        let mut rids = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => rids.push(rid),
                Err(OxbowError::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        index.end_scan().unwrap();

        assert_eq!(rids.len(), 5);
        assert_eq!(buf.stats().pinned_frames, 0);
    }

    #[test]
    fn test_scan_error_paths() {
        let (buf, _dir) = create_test_bufmgr();
        build_relation(&buf, "relA", &[1, 2, 3]);

        let (mut index, _) =
            BTreeIndex::new("relA", Arc::clone(&buf), 0, Datatype::Integer).unwrap();

        assert!(matches!(
            index.start_scan(2, Operator::LTE, 5, Operator::LTE),
            Err(OxbowError::BadOpcodes)
        ));
        assert!(matches!(
            index.start_scan(2, Operator::GT, 5, Operator::GT),
            Err(OxbowError::BadOpcodes)
        ));
        assert!(matches!(
            index.start_scan(5, Operator::GTE, 2, Operator::LTE),
            Err(OxbowError::BadScanrange)
        ));
        assert!(matches!(
            index.scan_next(),
            Err(OxbowError::ScanNotInitialized)
        ));
        assert!(matches!(
            index.end_scan(),
            Err(OxbowError::ScanNotInitialized)
        ));
        assert_eq!(buf.stats().pinned_frames, 0);
    }

    #[test]
    fn test_open_with_mismatched_parameters() {
        let (buf, _dir) = create_test_bufmgr();
        build_relation(&buf, "relA", &[1, 2, 3]);

        {
            let (index, _) =
                BTreeIndex::new("relA", Arc::clone(&buf), 0, Datatype::Integer).unwrap();
            drop(index);
        }

        // Same file name, different attribute type.
        assert!(matches!(
            BTreeIndex::new("relA", Arc::clone(&buf), 0, Datatype::Double),
            Err(OxbowError::BadIndexInfo(_))
        ));
        assert_eq!(buf.stats().pinned_frames, 0);
    }

    #[test]
    fn test_empty_tree_scan() {
        let (buf, _dir) = create_test_bufmgr();
        build_relation(&buf, "relA", &[]);

        let (mut index, _) =
            BTreeIndex::new("relA", Arc::clone(&buf), 0, Datatype::Integer).unwrap();

        assert!(matches!(
            index.start_scan(0, Operator::GT, 100, Operator::LT),
            Err(OxbowError::NoSuchKeyFound)
        ));
        // The failed start released everything; end_scan has nothing.
        assert!(matches!(
            index.end_scan(),
            Err(OxbowError::ScanNotInitialized)
        ));
        assert_eq!(buf.stats().pinned_frames, 0);
    }
}
