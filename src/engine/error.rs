use std::fmt;

use thiserror::Error;

use crate::btree::BPlusTreeError;
use crate::catalog::CatalogError;
use crate::file::FileError;
use crate::index::IndexError;
use crate::record::{RecordError, RowPointer};
use crate::txn::{TxnError, TxnId};
use crate::wal::WalError;

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corruption,
    NotFound,
    Constraint,
    Capacity,
    State,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::Corruption => "corruption",
            ErrorKind::NotFound => "not found",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Capacity => "capacity",
            ErrorKind::State => "state",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Database {0} already exists")]
    DatabaseExists(String),

    #[error("Database {0} not found")]
    DatabaseNotFound(String),

    #[error("Invalid database name: {0:?}")]
    InvalidDatabaseName(String),

    #[error("No database selected")]
    NoDatabaseSelected,

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Column {0} not found in table {1}")]
    ColumnNotFound(String, String),

    #[error("Table {table} has {expected} columns, got {actual} values")]
    ColumnCountMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Primary key violation: duplicate key {key} in table {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Foreign key violation: {column}={value} has no match in {ref_table}")]
    ForeignKeyViolation {
        column: String,
        value: String,
        ref_table: String,
    },

    #[error("Invalid foreign key on {table}.{column}: {reason}")]
    InvalidForeignKey {
        table: String,
        column: String,
        reason: String,
    },

    #[error("No row at {row} in table {table}")]
    RowNotFound { table: String, row: RowPointer },

    #[error("Transactions still open: {0:?}")]
    TransactionsActive(Vec<TxnId>),

    #[error("{op} on table {table} failed: {source}")]
    Operation {
        op: &'static str,
        table: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Cannot read/write file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    #[error("Record error: {0}")]
    RecordError(#[from] RecordError),

    #[error("Index error: {0}")]
    IndexError(#[from] IndexError),

    #[error("B+ tree error: {0}")]
    BPlusTreeError(#[from] BPlusTreeError),

    #[error("File error: {0}")]
    FileError(#[from] FileError),

    #[error("Log error: {0}")]
    WalError(#[from] WalError),

    #[error("Transaction error: {0}")]
    TxnError(#[from] TxnError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Attach the failing operation and table, once
    pub fn during(self, op: &'static str, table: &str) -> Self {
        match self {
            EngineError::Operation { .. } => self,
            source => EngineError::Operation {
                op,
                table: table.to_string(),
                source: Box::new(source),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DatabaseExists(_)
            | EngineError::TableExists(_)
            | EngineError::InvalidDatabaseName(_)
            | EngineError::ColumnCountMismatch { .. }
            | EngineError::DuplicateKey { .. }
            | EngineError::ForeignKeyViolation { .. }
            | EngineError::InvalidForeignKey { .. } => ErrorKind::Constraint,
            EngineError::DatabaseNotFound(_)
            | EngineError::TableNotFound(_)
            | EngineError::ColumnNotFound(..)
            | EngineError::RowNotFound { .. } => ErrorKind::NotFound,
            EngineError::NoDatabaseSelected | EngineError::TransactionsActive(_) => ErrorKind::State,
            EngineError::Operation { source, .. } => source.kind(),
            EngineError::IoError(_) => ErrorKind::Io,
            EngineError::CatalogError(e) => catalog_kind(e),
            EngineError::RecordError(e) => record_kind(e),
            EngineError::IndexError(e) => match e {
                IndexError::FileError(e) => file_kind(e),
                IndexError::BPlusTreeError(e) => tree_kind(e),
                IndexError::IndexNotOpen(_) => ErrorKind::NotFound,
            },
            EngineError::BPlusTreeError(e) => tree_kind(e),
            EngineError::FileError(e) => file_kind(e),
            EngineError::WalError(e) if e.is_corruption() => ErrorKind::Corruption,
            EngineError::WalError(WalError::Serialization(_)) => ErrorKind::Corruption,
            EngineError::WalError(_) => ErrorKind::Io,
            EngineError::TxnError(TxnError::NotFound(_)) => ErrorKind::NotFound,
            EngineError::TxnError(_) => ErrorKind::State,
        }
    }
}

fn file_kind(e: &FileError) -> ErrorKind {
    match e {
        FileError::Io(_) | FileError::LogFlush(_) => ErrorKind::Io,
        FileError::InvalidPageSize { .. } => ErrorKind::Corruption,
        FileError::FileNotOpen(_) | FileError::PageNotFound(_) => ErrorKind::NotFound,
        FileError::AllPagesPinned { .. } | FileError::MetadataTooLarge { .. } => ErrorKind::Capacity,
        FileError::FileIdInUse { .. } | FileError::PagePinned(_) | FileError::WalNotFlushed { .. } => {
            ErrorKind::State
        }
    }
}

fn record_kind(e: &RecordError) -> ErrorKind {
    match e {
        RecordError::File(e) => file_kind(e),
        RecordError::InvalidSlot { .. } | RecordError::TableNotOpen(_) => ErrorKind::NotFound,
        RecordError::PageFull { .. } | RecordError::RecordTooLarge { .. } => ErrorKind::Capacity,
        RecordError::InvalidRecord(_) | RecordError::Deserialization(_) => ErrorKind::Corruption,
        RecordError::Serialization(_)
        | RecordError::SchemaMismatch(_)
        | RecordError::NullConstraintViolation(_)
        | RecordError::TypeMismatch { .. }
        | RecordError::ValueTooLong { .. } => ErrorKind::Constraint,
    }
}

fn tree_kind(e: &BPlusTreeError) -> ErrorKind {
    match e {
        BPlusTreeError::File(e) => file_kind(e),
        BPlusTreeError::KeyTooLarge { .. }
        | BPlusTreeError::ValueTooLarge { .. }
        | BPlusTreeError::NodeTooLarge { .. } => ErrorKind::Capacity,
        BPlusTreeError::Corrupted { .. } => ErrorKind::Corruption,
        BPlusTreeError::InvalidState(_) => ErrorKind::State,
    }
}

fn catalog_kind(e: &CatalogError) -> ErrorKind {
    match e {
        CatalogError::IoError(_) => ErrorKind::Io,
        CatalogError::JsonError(_) => ErrorKind::Corruption,
        CatalogError::TableNotFound(_) => ErrorKind::NotFound,
        CatalogError::TableExists(_) => ErrorKind::Constraint,
        CatalogError::InvalidSchema(e) => record_kind(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(EngineError::NoDatabaseSelected.kind(), ErrorKind::State);
        assert_eq!(
            EngineError::from(FileError::AllPagesPinned { capacity: 4 }).kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            EngineError::from(WalError::ChecksumMismatch { segment: 0, lsn: 9 }).kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            EngineError::from(CatalogError::TableNotFound("t".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::from(TxnError::AlreadyCommitted(3)).kind(),
            ErrorKind::State
        );
    }

    #[test]
    fn test_operation_context() {
        let err = EngineError::DuplicateKey {
            table: "users".into(),
            key: "1".into(),
        }
        .during("insert", "users")
        .during("auto-commit", "users");

        assert_eq!(err.kind(), ErrorKind::Constraint);
        let message = err.to_string();
        assert!(message.starts_with("insert on table users failed"));
        assert!(message.contains("duplicate key 1"));
    }
}
