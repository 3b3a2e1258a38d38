//! StrataDB storage engine
//!
//! Paged files behind an LRU buffer pool, slotted heap pages for rows, a
//! disk B+ tree per table for the primary index, and a segmented write-ahead
//! log that drives transactions, checkpoints and crash recovery.

pub mod btree;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod file;
pub mod index;
pub mod record;
pub mod txn;
pub mod wal;

mod sync;

pub use btree::{BPlusTree, BPlusTreeError, BPlusTreeResult};
pub use catalog::{CatalogError, CatalogManager};
pub use checkpoint::Checkpoint;
pub use config::EngineConfig;
pub use engine::{
    EngineError, EngineResult, ErrorKind, HeapPageSummary, JoinKind, JoinSpec, Predicate,
    RecoveryStats, SelectPayload, SelectResult, StorageEngine,
};
pub use file::{BUFFER_POOL_SIZE, BufferPool, DiskManager, FileError, Lsn, PAGE_SIZE, PageId};
pub use record::{
    ColumnDef, DataType, ForeignKey, HeapFile, RecordError, RecordResult, Row, RowPointer,
    TableSchema, Value,
};
pub use txn::{TransactionManager, TxnError, TxnId};
pub use wal::{WalError, WalManager, WalOperation};
