use crate::file::{FileError, PageId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid slot: page_id={page:#x}, slot={slot}")]
    InvalidSlot { page: PageId, slot: u16 },

    #[error("Insufficient space in page {page:#x}: need {needed} bytes, {available} available")]
    PageFull {
        page: PageId,
        needed: usize,
        available: usize,
    },

    #[error("Record of {size} bytes can never fit in a page (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("NULL value for NOT NULL column: {0}")]
    NullConstraintViolation(String),

    #[error("Type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Value for column '{column}' is {len} bytes, limit is {max}")]
    ValueTooLong {
        column: String,
        len: usize,
        max: usize,
    },

    #[error("Table not open: {0}")]
    TableNotOpen(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
