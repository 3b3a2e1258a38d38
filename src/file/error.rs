use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::{FileId, Lsn, PageId};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File {0} is not open")]
    FileNotOpen(FileId),

    #[error("File id {id} is already bound to {path}")]
    FileIdInUse { id: FileId, path: PathBuf },

    #[error("Page not resident in buffer pool: page_id={0:#x}")]
    PageNotFound(PageId),

    #[error("Page {0:#x} is pinned")]
    PagePinned(PageId),

    #[error("Buffer pool exhausted: all {capacity} pages are pinned")]
    AllPagesPinned { capacity: usize },

    #[error("Page {page:#x} has LSN {page_lsn} but the log is only flushed to {flushed_lsn}")]
    WalNotFlushed {
        page: PageId,
        page_lsn: Lsn,
        flushed_lsn: Lsn,
    },

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Metadata payload of {size} bytes exceeds the {max} byte limit")]
    MetadataTooLarge { size: usize, max: usize },

    #[error("Failed to force the log: {0}")]
    LogFlush(String),
}

impl FileError {
    /// Whether the error reflects a full pool rather than a failed operation
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            FileError::AllPagesPinned { .. } | FileError::MetadataTooLarge { .. }
        )
    }
}

pub type FileResult<T> = Result<T, FileError>;
