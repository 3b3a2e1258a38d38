use super::error::{FileError, FileResult};
use super::{FileId, LocalPageId, Lsn, PAGE_SIZE, PAGE_TYPE_OFFSET, PageId, split_page_id};

/// Tag stored at byte 8 of every page on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    Unknown,
    HeapData,
    BPlusNode,
    Metadata,
}

impl PageType {
    pub fn from_byte(tag: u8) -> Self {
        match tag {
            1 => PageType::HeapData,
            2 => PageType::BPlusNode,
            3 => PageType::Metadata,
            _ => PageType::Unknown,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PageType::Unknown => 0,
            PageType::HeapData => 1,
            PageType::BPlusNode => 2,
            PageType::Metadata => 3,
        }
    }
}

/// A page image plus the header fields the buffer pool tracks in memory.
///
/// Dirty state and pin counts live on the buffer pool frame that owns the
/// page; the page itself only knows its identity, type and last-applied LSN.
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    page_type: PageType,
    lsn: Lsn,
    data: Box<[u8]>,
}

impl Page {
    /// Create a zero-filled page
    pub fn new(id: PageId, page_type: PageType) -> Self {
        let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
        data[PAGE_TYPE_OFFSET] = page_type.as_byte();
        Self {
            id,
            page_type,
            lsn: 0,
            data,
        }
    }

    /// Wrap a raw image read from disk. The type comes from byte 8; heap
    /// pages additionally carry their last-applied LSN in bytes 0..8.
    pub fn from_bytes(id: PageId, bytes: Vec<u8>) -> FileResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            });
        }

        let page_type = PageType::from_byte(bytes[PAGE_TYPE_OFFSET]);
        let lsn = if page_type == PageType::HeapData {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[0..8]);
            u64::from_le_bytes(raw)
        } else {
            0
        };

        Ok(Self {
            id,
            page_type,
            lsn,
            data: bytes.into_boxed_slice(),
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn file_id(&self) -> FileId {
        split_page_id(self.id).0
    }

    pub fn local_id(&self) -> LocalPageId {
        split_page_id(self.id).1
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type;
        self.data[PAGE_TYPE_OFFSET] = page_type.as_byte();
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Record the LSN of the latest change applied to this page. Heap pages
    /// persist it in their header.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
        if self.page_type == PageType::HeapData {
            self.data[0..8].copy_from_slice(&lsn.to_le_bytes());
        }
    }

    /// Write the in-memory type into byte 8 ahead of a disk write
    pub(crate) fn stamp_type(&mut self) {
        self.data[PAGE_TYPE_OFFSET] = self.page_type.as_byte();
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
