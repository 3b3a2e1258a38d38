mod buffer_pool;
mod disk_manager;
mod error;
mod page;

pub use buffer_pool::{BufferPool, LogFlusher, PageGuard};
pub use disk_manager::DiskManager;
pub use error::{FileError, FileResult};
pub use page::{Page, PageType};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames in the buffer pool
pub const BUFFER_POOL_SIZE: usize = 1024;

/// Byte offset of the page-type tag stamped into every page on write
pub const PAGE_TYPE_OFFSET: usize = 8;

/// Metadata pages reserve bytes 0..9; the user payload starts here
pub const METADATA_PAYLOAD_OFFSET: usize = 9;

/// File identifier assigned by the catalog (heap/index) or the disk manager (WAL)
pub type FileId = u32;

/// Page number within a single file, as stored on disk
pub type LocalPageId = u32;

/// Global page identifier: `(file_id << 32) | local`
pub type PageId = u64;

/// Log sequence number
pub type Lsn = u64;

/// Pack a `(file, local)` pair into a global page id.
pub fn global_page_id(file_id: FileId, local: LocalPageId) -> PageId {
    ((file_id as u64) << 32) | local as u64
}

/// Split a global page id back into its `(file, local)` pair.
pub fn split_page_id(page_id: PageId) -> (FileId, LocalPageId) {
    ((page_id >> 32) as FileId, page_id as LocalPageId)
}
