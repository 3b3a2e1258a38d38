use thiserror::Error;

use crate::file::{FileError, PageId};

/// Errors that can occur during B+ tree operations
#[derive(Debug, Error)]
pub enum BPlusTreeError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value of {len} bytes exceeds the {max} byte limit")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Node {page:#x} needs {size} bytes and does not fit in a page")]
    NodeTooLarge { page: PageId, size: usize },

    #[error("Corrupted node {page:#x}: {reason}")]
    Corrupted { page: PageId, reason: String },

    #[error("Invalid tree state: {0}")]
    InvalidState(String),
}

pub type BPlusTreeResult<T> = Result<T, BPlusTreeError>;
