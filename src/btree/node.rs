use super::error::{BPlusTreeError, BPlusTreeResult};
use crate::file::{FileId, PAGE_SIZE, PAGE_TYPE_OFFSET, PageId, PageType, global_page_id, split_page_id};

/// Split fires when a node reaches `MAX_KEYS + 1` keys
pub const MAX_KEYS: usize = 32;

/// A non-root node with fewer keys than this has underflowed
pub const MIN_KEYS: usize = 16;

pub const MAX_KEY_LEN: usize = 256;
pub const MAX_VALUE_LEN: usize = 4096;

/// pageID(8) type(1) isLeaf(1) numKeys(2) parent(8) next(8) reserved(7)
pub const NODE_HEADER_SIZE: usize = 35;

const IS_LEAF_OFFSET: usize = 9;
const NUM_KEYS_OFFSET: usize = 10;
const PARENT_OFFSET: usize = 12;
const NEXT_OFFSET: usize = 20;

/// One B+ tree node, decoded from (and encoded into) exactly one page.
///
/// In memory every reference is a global page id. On disk they are stored as
/// local page numbers so the file can be reopened under any file id; local 0
/// is the metadata page and doubles as "none".
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub page_id: PageId,
    pub is_leaf: bool,
    pub parent: Option<PageId>,
    /// Right sibling; leaves only
    pub next: Option<PageId>,
    pub keys: Vec<Vec<u8>>,
    /// Parallel to `keys`; leaves only
    pub values: Vec<Vec<u8>>,
    /// `keys.len() + 1` entries; internal nodes only
    pub children: Vec<PageId>,
}

impl Node {
    pub fn new_leaf(page_id: PageId) -> Self {
        Self {
            page_id,
            is_leaf: true,
            parent: None,
            next: None,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal(page_id: PageId) -> Self {
        Self {
            is_leaf: false,
            ..Self::new_leaf(page_id)
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Encoded size in bytes
    pub fn encoded_size(&self) -> usize {
        let keys: usize = self.keys.iter().map(|k| 2 + k.len()).sum();
        let body = if self.is_leaf {
            self.values.iter().map(|v| 2 + v.len()).sum::<usize>()
        } else {
            self.children.len() * 8
        };
        NODE_HEADER_SIZE + keys + body
    }

    /// Encode into a page buffer
    pub fn serialize(&self, buf: &mut [u8]) -> BPlusTreeResult<()> {
        let size = self.encoded_size();
        if size > PAGE_SIZE || buf.len() < PAGE_SIZE {
            return Err(BPlusTreeError::NodeTooLarge {
                page: self.page_id,
                size,
            });
        }

        buf.fill(0);
        buf[0..8].copy_from_slice(&(split_page_id(self.page_id).1 as u64).to_le_bytes());
        buf[PAGE_TYPE_OFFSET] = PageType::BPlusNode.as_byte();
        buf[IS_LEAF_OFFSET] = self.is_leaf as u8;
        buf[NUM_KEYS_OFFSET..NUM_KEYS_OFFSET + 2].copy_from_slice(&(self.keys.len() as u16).to_le_bytes());
        buf[PARENT_OFFSET..PARENT_OFFSET + 8].copy_from_slice(&local_ref(self.parent).to_le_bytes());
        buf[NEXT_OFFSET..NEXT_OFFSET + 8].copy_from_slice(&local_ref(self.next).to_le_bytes());

        let mut pos = NODE_HEADER_SIZE;
        for key in &self.keys {
            put_bytes(buf, &mut pos, key);
        }
        if self.is_leaf {
            for value in &self.values {
                put_bytes(buf, &mut pos, value);
            }
        } else {
            for child in &self.children {
                buf[pos..pos + 8].copy_from_slice(&local_ref(Some(*child)).to_le_bytes());
                pos += 8;
            }
        }
        Ok(())
    }

    /// Decode the node stored in page `page_id` of `file_id`
    pub fn deserialize(file_id: FileId, page_id: PageId, buf: &[u8]) -> BPlusTreeResult<Self> {
        let corrupt = |reason: String| BPlusTreeError::Corrupted {
            page: page_id,
            reason,
        };

        if buf.len() < PAGE_SIZE {
            return Err(corrupt(format!("short page of {} bytes", buf.len())));
        }
        if buf[PAGE_TYPE_OFFSET] != PageType::BPlusNode.as_byte() {
            return Err(corrupt(format!("page type tag {}", buf[PAGE_TYPE_OFFSET])));
        }

        let stored_local = read_i64(buf, 0);
        if stored_local != split_page_id(page_id).1 as i64 {
            return Err(corrupt(format!("header names page {}", stored_local)));
        }

        let is_leaf = buf[IS_LEAF_OFFSET] != 0;
        let num_keys = u16::from_le_bytes([buf[NUM_KEYS_OFFSET], buf[NUM_KEYS_OFFSET + 1]]) as usize;
        if num_keys > MAX_KEYS {
            return Err(corrupt(format!("{} keys", num_keys)));
        }
        let parent = global_ref(file_id, read_i64(buf, PARENT_OFFSET));
        let next = global_ref(file_id, read_i64(buf, NEXT_OFFSET));

        let mut pos = NODE_HEADER_SIZE;
        let mut keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            keys.push(take_bytes(buf, &mut pos).ok_or_else(|| corrupt("key overruns page".into()))?);
        }

        let mut node = Self {
            page_id,
            is_leaf,
            parent,
            next,
            keys,
            values: Vec::new(),
            children: Vec::new(),
        };

        if is_leaf {
            for _ in 0..num_keys {
                node.values.push(
                    take_bytes(buf, &mut pos).ok_or_else(|| corrupt("value overruns page".into()))?,
                );
            }
        } else {
            for _ in 0..=num_keys {
                if pos + 8 > PAGE_SIZE {
                    return Err(corrupt("child list overruns page".into()));
                }
                let child = global_ref(file_id, read_i64(buf, pos))
                    .ok_or_else(|| corrupt("null child pointer".into()))?;
                node.children.push(child);
                pos += 8;
            }
        }
        Ok(node)
    }
}

fn local_ref(page: Option<PageId>) -> i64 {
    page.map_or(0, |id| split_page_id(id).1 as i64)
}

fn global_ref(file_id: FileId, local: i64) -> Option<PageId> {
    (local > 0).then(|| global_page_id(file_id, local as u32))
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(raw)
}

fn put_bytes(buf: &mut [u8], pos: &mut usize, bytes: &[u8]) {
    buf[*pos..*pos + 2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf[*pos + 2..*pos + 2 + bytes.len()].copy_from_slice(bytes);
    *pos += 2 + bytes.len();
}

fn take_bytes(buf: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    if *pos + 2 > buf.len() {
        return None;
    }
    let len = u16::from_le_bytes([buf[*pos], buf[*pos + 1]]) as usize;
    let start = *pos + 2;
    let bytes = buf.get(start..start + len)?.to_vec();
    *pos = start + len;
    Some(bytes)
}
