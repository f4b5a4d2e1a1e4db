//! Index meta page.
//!
//! The first allocated page of an index file records what the index was
//! built over and where the current root lives. The root page number is the
//! only mutable field; it changes on root promotion.

use oxbow_common::page::PageNo;
use oxbow_common::types::Datatype;
use oxbow_common::{OxbowError, Result};

/// Maximum stored length of the relation name.
pub const MAX_RELATION_NAME: usize = 64;

const NAME_LEN_OFFSET: usize = 0;
const NAME_OFFSET: usize = 2;
const ATTR_TYPE_OFFSET: usize = NAME_OFFSET + MAX_RELATION_NAME;
const ATTR_OFFSET_OFFSET: usize = ATTR_TYPE_OFFSET + 2;
const ROOT_OFFSET: usize = ATTR_OFFSET_OFFSET + 4;

/// Contents of the index meta page.
///
/// Layout (76 bytes at page offset 0): name_len u16, name [64]u8,
/// attr_type u8 + reserved, attr_byte_offset u32, root_page_no u32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetaInfo {
    /// Name of the indexed relation.
    pub relation_name: String,
    /// Byte offset of the indexed attribute within a record.
    pub attr_byte_offset: u32,
    /// Type of the indexed attribute.
    pub attr_type: Datatype,
    /// Page number of the current root node.
    pub root_page_no: PageNo,
}

impl IndexMetaInfo {
    /// Serialized size on the meta page.
    pub const SIZE: usize = ROOT_OFFSET + 4;

    /// Creates meta info, validating the relation name length.
    pub fn new(
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: Datatype,
        root_page_no: PageNo,
    ) -> Result<Self> {
        if relation_name.len() > MAX_RELATION_NAME {
            return Err(OxbowError::Internal(format!(
                "relation name '{}' exceeds {} bytes",
                relation_name, MAX_RELATION_NAME
            )));
        }
        Ok(Self {
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            attr_type,
            root_page_no,
        })
    }

    /// Writes the meta info at the start of a page.
    pub fn write_to(&self, data: &mut [u8]) {
        data[NAME_LEN_OFFSET..NAME_LEN_OFFSET + 2]
            .copy_from_slice(&(self.relation_name.len() as u16).to_le_bytes());

        let name_bytes = self.relation_name.as_bytes();
        data[NAME_OFFSET..NAME_OFFSET + name_bytes.len()].copy_from_slice(name_bytes);
        data[NAME_OFFSET + name_bytes.len()..NAME_OFFSET + MAX_RELATION_NAME].fill(0);

        data[ATTR_TYPE_OFFSET] = self.attr_type.as_u8();
        data[ATTR_TYPE_OFFSET + 1] = 0;
        data[ATTR_OFFSET_OFFSET..ATTR_OFFSET_OFFSET + 4]
            .copy_from_slice(&self.attr_byte_offset.to_le_bytes());
        data[ROOT_OFFSET..ROOT_OFFSET + 4].copy_from_slice(&self.root_page_no.to_le_bytes());
    }

    /// Reads the meta info from the start of a page.
    pub fn read_from(data: &[u8]) -> Result<Self> {
        let name_len = u16::from_le_bytes([data[NAME_LEN_OFFSET], data[NAME_LEN_OFFSET + 1]]);
        if name_len as usize > MAX_RELATION_NAME {
            return Err(OxbowError::Internal(
                "corrupt meta page: relation name length out of range".to_string(),
            ));
        }

        let name_bytes = &data[NAME_OFFSET..NAME_OFFSET + name_len as usize];
        let relation_name = std::str::from_utf8(name_bytes)
            .map_err(|_| {
                OxbowError::Internal("corrupt meta page: relation name is not UTF-8".to_string())
            })?
            .to_string();

        let attr_type = Datatype::from_u8(data[ATTR_TYPE_OFFSET]).ok_or_else(|| {
            OxbowError::Internal("corrupt meta page: unknown attribute type tag".to_string())
        })?;

        Ok(Self {
            relation_name,
            attr_byte_offset: u32::from_le_bytes([
                data[ATTR_OFFSET_OFFSET],
                data[ATTR_OFFSET_OFFSET + 1],
                data[ATTR_OFFSET_OFFSET + 2],
                data[ATTR_OFFSET_OFFSET + 3],
            ]),
            attr_type,
            root_page_no: Self::root_page_no(data),
        })
    }

    /// Reads just the root page number.
    #[inline]
    pub fn root_page_no(data: &[u8]) -> PageNo {
        u32::from_le_bytes([
            data[ROOT_OFFSET],
            data[ROOT_OFFSET + 1],
            data[ROOT_OFFSET + 2],
            data[ROOT_OFFSET + 3],
        ])
    }

    /// Updates just the root page number.
    #[inline]
    pub fn set_root_page_no(data: &mut [u8], root: PageNo) {
        data[ROOT_OFFSET..ROOT_OFFSET + 4].copy_from_slice(&root.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxbow_common::page::PAGE_SIZE;

    #[test]
    fn test_meta_roundtrip() {
        let meta = IndexMetaInfo::new("relA", 0, Datatype::Integer, 2).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        meta.write_to(&mut page);

        let read_back = IndexMetaInfo::read_from(&page).unwrap();
        assert_eq!(read_back, meta);
    }

    #[test]
    fn test_root_update_in_place() {
        let meta = IndexMetaInfo::new("relA", 8, Datatype::Integer, 2).unwrap();
        let mut page = vec![0u8; PAGE_SIZE];
        meta.write_to(&mut page);

        IndexMetaInfo::set_root_page_no(&mut page, 77);
        assert_eq!(IndexMetaInfo::root_page_no(&page), 77);

        let read_back = IndexMetaInfo::read_from(&page).unwrap();
        assert_eq!(read_back.root_page_no, 77);
        assert_eq!(read_back.relation_name, "relA");
        assert_eq!(read_back.attr_byte_offset, 8);
    }

    #[test]
    fn test_name_too_long() {
        let name = "x".repeat(MAX_RELATION_NAME + 1);
        assert!(IndexMetaInfo::new(&name, 0, Datatype::Integer, 1).is_err());
    }

    #[test]
    fn test_corrupt_type_tag() {
        let meta = IndexMetaInfo::new("relA", 0, Datatype::Integer, 2).unwrap();
        let mut page = vec![0u8; PAGE_SIZE];
        meta.write_to(&mut page);

        page[ATTR_TYPE_OFFSET] = 0xFF;
        assert!(IndexMetaInfo::read_from(&page).is_err());
    }
}
