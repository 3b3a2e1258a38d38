//! Storage engine facade
//!
//! `StorageEngine` owns a data root holding one directory per database and
//! at most one open database at a time. Opening a database builds its
//! managers (disk, buffer pool, log, heaps, indexes, catalog, transactions,
//! checkpoint) and runs crash recovery before anything else can touch it.
//!
//! ```text
//! <root>/<db>/tables/<file id>.heap
//! <root>/<db>/tables/<table>_schema.json
//! <root>/<db>/indexes/<table>_primary.idx
//! <root>/<db>/logs/wal_<016x>.log
//! <root>/<db>/metadata/*.json
//! <root>/<db>/checkpoint.json
//! ```

mod dml;
mod error;
mod recovery;
mod select;

pub use error::{EngineError, EngineResult, ErrorKind};
pub use recovery::RecoveryStats;
pub use select::{JoinKind, JoinSpec, Predicate, SelectPayload, SelectResult};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};

use crate::btree::BPlusTree;
use crate::catalog::{CatalogError, CatalogManager, INDEXES_DIR, METADATA_DIR, TABLES_DIR, TableFiles};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::EngineConfig;
use crate::file::{BufferPool, DiskManager, LocalPageId, LogFlusher, global_page_id};
use crate::index::IndexFileManager;
use crate::record::{HeapFile, HeapFileManager, HeapPage, RecordError, Row, RowPointer, TableSchema, Value};
use crate::sync::{lock, read, write};
use crate::txn::{TransactionManager, TxnId};
use crate::wal::{WalManager, WalOperation};

pub const LOGS_DIR: &str = "logs";

/// Everything belonging to one open database
pub(crate) struct DatabaseContext {
    name: String,
    path: PathBuf,
    pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
    heaps: HeapFileManager,
    indexes: IndexFileManager,
    catalog: CatalogManager,
    txns: TransactionManager,
    checkpoints: CheckpointManager,
    /// Held across a statement's LSN allocation, page changes and log append
    /// so records reach the log in LSN order
    latch: Mutex<()>,
}

/// Schema and open files of one table
pub(crate) struct TableHandle {
    schema: TableSchema,
    heap: Arc<HeapFile>,
    index: Arc<BPlusTree>,
}

/// Header and slot directory of one heap page, for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapPageSummary {
    pub page_number: LocalPageId,
    pub lsn: u64,
    pub record_end: u16,
    pub slot_region_start: u16,
    pub num_rows: u16,
    pub num_rows_free: u16,
    pub free_space: usize,
    /// `(offset, length)` per slot; length 0 is a tombstone
    pub slots: Vec<(u16, u16)>,
}

pub struct StorageEngine {
    root: PathBuf,
    config: EngineConfig,
    current: RwLock<Option<Arc<DatabaseContext>>>,
}

/// Primary-key bytes of a row: the encoded PK value, or the row pointer for
/// tables without a declared key
pub(crate) fn row_key(schema: &TableSchema, values: &[Value], rp: &RowPointer) -> Vec<u8> {
    match schema.primary_key_index().and_then(|i| values.get(i)) {
        Some(value) => value.key_bytes(),
        None => rp.to_bytes().to_vec(),
    }
}

fn validate_name(name: &str) -> EngineResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidDatabaseName(name.to_string()))
    }
}

fn table_error(e: CatalogError) -> EngineError {
    match e {
        CatalogError::TableNotFound(table) => EngineError::TableNotFound(table),
        e => e.into(),
    }
}

impl DatabaseContext {
    fn open(name: &str, path: &Path, config: &EngineConfig) -> EngineResult<Self> {
        let disk = Arc::new(DiskManager::new());
        let wal = Arc::new(WalManager::with_segment_size(
            path.join(LOGS_DIR),
            config.wal_segment_size,
        )?);
        let flusher: Arc<dyn LogFlusher> = wal.clone();
        let pool = Arc::new(BufferPool::with_log(disk, config.buffer_pool_pages, flusher));
        let catalog = CatalogManager::load(path)?;

        let db = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            heaps: HeapFileManager::new(Arc::clone(&pool)),
            indexes: IndexFileManager::new(Arc::clone(&pool)),
            pool,
            wal,
            catalog,
            txns: TransactionManager::new(),
            checkpoints: CheckpointManager::new(path),
            latch: Mutex::new(()),
        };
        for table in db.catalog.table_names() {
            let files = db.catalog.files(&table)?;
            db.open_table_files(&table, files)?;
        }
        Ok(db)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn open_table_files(&self, table: &str, files: TableFiles) -> EngineResult<()> {
        self.heaps
            .open_table(table, files.heap_file_id, self.catalog.heap_path(&files))?;
        self.indexes
            .open_index(table, files.index_file_id, self.catalog.index_path(table))?;
        Ok(())
    }

    fn close_table_files(&self, table: &str) {
        if self.heaps.is_open(table)
            && let Err(e) = self.heaps.close_table(table)
        {
            warn!("closing heap of '{}' failed: {}", table, e);
        }
        if self.indexes.is_open(table)
            && let Err(e) = self.indexes.close_index(table)
        {
            warn!("closing index of '{}' failed: {}", table, e);
        }
    }

    /// Stored bytes of the row at `rp`; a tombstone or unknown slot is
    /// `RowNotFound`
    pub(crate) fn row_data(&self, handle: &TableHandle, rp: &RowPointer) -> EngineResult<Vec<u8>> {
        handle.heap.get(rp).map_err(|e| match e {
            RecordError::InvalidSlot { .. } => EngineError::RowNotFound {
                table: handle.schema.name().to_string(),
                row: *rp,
            },
            e => e.into(),
        })
    }

    pub(crate) fn table(&self, name: &str) -> EngineResult<TableHandle> {
        let schema = self.catalog.schema(name).map_err(table_error)?;
        Ok(TableHandle {
            schema,
            heap: self.heaps.get(name)?,
            index: self.indexes.get(name)?,
        })
    }

    fn create_table(&self, schema: TableSchema) -> EngineResult<()> {
        let _latch = lock(&self.latch);
        if self.catalog.contains(schema.name()) {
            return Err(EngineError::TableExists(schema.name().to_string()));
        }
        schema.validate()?;
        self.check_foreign_key_targets(&schema)?;

        let lsn = self.wal.append_operation(&WalOperation::CreateTable {
            schema: schema.clone(),
        })?;
        self.wal.sync()?;

        let created = self
            .catalog
            .register_table(&schema)
            .map_err(EngineError::from)
            .and_then(|files| self.open_table_files(schema.name(), files));
        if let Err(e) = created {
            self.cancel_create_table(schema.name(), lsn);
            return Err(e);
        }

        info!("created table '{}' in '{}'", schema.name(), self.name);
        Ok(())
    }

    /// Undo a half-done CREATE TABLE and log that recovery must skip it
    fn cancel_create_table(&self, table: &str, lsn: u64) {
        self.close_table_files(table);
        if self.catalog.contains(table)
            && let Err(e) = self.catalog.unregister_table(table)
        {
            warn!("unregistering '{}' failed: {}", table, e);
        }
        let logged = self
            .wal
            .append_operation(&WalOperation::Compensation { target_lsn: lsn })
            .and_then(|_| self.wal.sync());
        if let Err(e) = logged {
            warn!("logging compensation for LSN {} failed: {}", lsn, e);
        }
    }

    /// Every foreign key must name an existing table's primary key column of
    /// the same type
    fn check_foreign_key_targets(&self, schema: &TableSchema) -> EngineResult<()> {
        for fk in schema.foreign_keys() {
            let invalid = |reason: String| EngineError::InvalidForeignKey {
                table: schema.name().to_string(),
                column: fk.column.clone(),
                reason,
            };
            let target = if fk.ref_table == schema.name() {
                schema.clone()
            } else {
                self.catalog
                    .schema(&fk.ref_table)
                    .map_err(|_| invalid(format!("table '{}' does not exist", fk.ref_table)))?
            };

            let Some(ref_idx) = target.find_column(&fk.ref_column) else {
                return Err(invalid(format!(
                    "column '{}' does not exist in '{}'",
                    fk.ref_column, fk.ref_table
                )));
            };
            if target.primary_key_index() != Some(ref_idx) {
                return Err(invalid(format!(
                    "'{}.{}' is not a primary key",
                    fk.ref_table, fk.ref_column
                )));
            }

            let own_type = schema
                .find_column(&fk.column)
                .and_then(|i| schema.column(i))
                .map(|c| c.data_type);
            let ref_type = target.column(ref_idx).map(|c| c.data_type);
            if own_type != ref_type {
                return Err(invalid(format!(
                    "type does not match '{}.{}'",
                    fk.ref_table, fk.ref_column
                )));
            }
        }
        Ok(())
    }

    /// Make everything logged so far durable and record where replay starts.
    /// The caller holds the statement latch.
    fn write_checkpoint(&self) -> EngineResult<Checkpoint> {
        self.wal.sync()?;
        self.pool.flush_all_pages()?;
        self.pool.disk().sync()?;

        let next = self.wal.current_lsn() + 1;
        let lsn = self
            .txns
            .oldest_active_lsn()
            .map_or(next, |first| first.min(next));
        let checkpoint = self.checkpoints.save(lsn, &self.name)?;
        self.wal.remove_segments_before(lsn)?;
        let forgotten = self.txns.forget_finished();
        debug!("checkpoint at LSN {}, {} finished transactions forgotten", lsn, forgotten);
        Ok(checkpoint)
    }

    fn save_checkpoint(&self) -> EngineResult<Checkpoint> {
        let _latch = lock(&self.latch);
        self.write_checkpoint()
    }

    fn close(&self, checkpoint: bool) -> EngineResult<()> {
        for txn in self.txns.active_ids() {
            warn!("aborting transaction {} left open at close", txn);
            self.abort_transaction(txn)?;
        }
        if checkpoint {
            self.save_checkpoint()?;
        } else {
            self.wal.sync()?;
            self.pool.flush_all_pages()?;
        }
        self.pool.disk().close_all()?;
        info!("closed database '{}'", self.name);
        Ok(())
    }
}

impl StorageEngine {
    /// Engine over the data root `root`, created if missing
    pub fn new<P: AsRef<Path>>(root: P) -> EngineResult<Self> {
        Self::with_config(root, EngineConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(root: P, config: EngineConfig) -> EngineResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            config,
            current: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn db(&self) -> EngineResult<Arc<DatabaseContext>> {
        read(&self.current)
            .clone()
            .ok_or(EngineError::NoDatabaseSelected)
    }

    pub fn create_database(&self, name: &str) -> EngineResult<()> {
        validate_name(name)?;
        let path = self.root.join(name);
        if path.exists() {
            return Err(EngineError::DatabaseExists(name.to_string()));
        }
        for dir in [TABLES_DIR, INDEXES_DIR, LOGS_DIR, METADATA_DIR] {
            fs::create_dir_all(path.join(dir))?;
        }
        info!("created database '{}'", name);
        Ok(())
    }

    /// Database names under the root, sorted
    pub fn show_databases(&self) -> EngineResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Open `name`, recover it from its log and make it current. The
    /// previously current database is closed first.
    pub fn use_database(&self, name: &str) -> EngineResult<RecoveryStats> {
        validate_name(name)?;
        let path = self.root.join(name);
        if !path.is_dir() {
            return Err(EngineError::DatabaseNotFound(name.to_string()));
        }
        self.close_current_database()?;

        let db = DatabaseContext::open(name, &path, &self.config)?;
        let stats = db.recover()?;
        *write(&self.current) = Some(Arc::new(db));
        info!("using database '{}' at {}", name, path.display());
        Ok(stats)
    }

    pub fn current_database(&self) -> Option<String> {
        read(&self.current).as_ref().map(|db| db.name().to_string())
    }

    /// Abort open transactions, flush, optionally checkpoint, and close every
    /// file of the current database. A no-op when none is selected.
    pub fn close_current_database(&self) -> EngineResult<()> {
        let Some(db) = write(&self.current).take() else {
            return Ok(());
        };
        db.close(self.config.checkpoint_on_close)
    }

    pub fn create_table(&self, schema: TableSchema) -> EngineResult<()> {
        let db = self.db()?;
        let table = schema.name().to_string();
        db.create_table(schema).map_err(|e| e.during("create table", &table))
    }

    pub fn table_names(&self) -> EngineResult<Vec<String>> {
        Ok(self.db()?.catalog.table_names())
    }

    pub fn table_schema(&self, table: &str) -> EngineResult<TableSchema> {
        self.db()?.catalog.schema(table).map_err(table_error)
    }

    /// The row stored at `rp`. Reads see the latest written state,
    /// committed or not.
    pub fn get_row(&self, table: &str, rp: &RowPointer) -> EngineResult<Row> {
        let db = self.db()?;
        let handle = db.table(table)?;
        let data = db.row_data(&handle, rp)?;
        Ok(Row::decode(&data, &handle.schema)?)
    }

    /// Every live row of `table` in page/slot order
    pub fn scan(&self, table: &str) -> EngineResult<Vec<(RowPointer, Row)>> {
        let handle = self.db()?.table(table)?;
        handle
            .heap
            .scan_rows()?
            .into_iter()
            .map(|(rp, data)| Ok((rp, Row::decode(&data, &handle.schema)?)))
            .collect()
    }

    pub fn heap_page_count(&self, table: &str) -> EngineResult<LocalPageId> {
        Ok(self.db()?.table(table)?.heap.page_count()?)
    }

    pub fn heap_page_summary(&self, table: &str, page: LocalPageId) -> EngineResult<HeapPageSummary> {
        let db = self.db()?;
        let handle = db.table(table)?;
        if page >= handle.heap.page_count()? {
            return Err(RecordError::InvalidSlot {
                page: global_page_id(handle.heap.file_id(), page),
                slot: 0,
            }
            .into());
        }

        let guard = db.pool.fetch_page(global_page_id(handle.heap.file_id(), page))?;
        let frame = guard.read();
        let heap = HeapPage::new(frame.data());
        Ok(HeapPageSummary {
            page_number: page,
            lsn: heap.lsn(),
            record_end: heap.record_end(),
            slot_region_start: heap.slot_region_start(),
            num_rows: heap.num_rows(),
            num_rows_free: heap.num_rows_free(),
            free_space: heap.free_space(),
            slots: (0..heap.slot_count()).filter_map(|s| heap.slot(s)).collect(),
        })
    }

    /// Flush everything and move the replay start forward
    pub fn save_checkpoint(&self) -> EngineResult<Checkpoint> {
        self.db()?.save_checkpoint()
    }

    /// Run recovery again on the current database. Transactions still
    /// open are aborted first; recovery reverses whatever their abort
    /// could not.
    pub fn recover_from_wal(&self) -> EngineResult<RecoveryStats> {
        let db = self.db()?;
        for txn in db.txns.active_ids() {
            warn!("aborting transaction {} before recovery", txn);
            if let Err(e) = db.abort_transaction(txn) {
                warn!("abort of transaction {} before recovery failed: {}", txn, e);
            }
        }
        db.recover()
    }

    /// Run `f` in a fresh transaction; commit on success, abort on error
    pub fn auto_commit<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Self, TxnId) -> EngineResult<T>,
    {
        let txn = self.begin_transaction()?;
        match f(self, txn) {
            Ok(value) => {
                self.commit_transaction(txn)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = self.abort_transaction(txn) {
                    warn!("aborting transaction {} failed: {}", txn, abort_err);
                }
                Err(e)
            }
        }
    }

    pub fn database_path(&self) -> EngineResult<PathBuf> {
        Ok(self.db()?.path.clone())
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close_current_database() {
            warn!("closing database on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests;
