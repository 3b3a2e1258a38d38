//! Row changes and transaction control
//!
//! Every change goes heap first, then log, then index, then the
//! transaction's undo log. A failure part way through is reversed locally
//! before the error is returned.

use log::{debug, warn};

use super::error::{EngineError, EngineResult};
use super::{DatabaseContext, StorageEngine, TableHandle, row_key};
use crate::file::Lsn;
use crate::record::{MAX_RECORD_SIZE, RecordError, Row, RowPointer, TableSchema, Value};
use crate::sync::lock;
use crate::txn::{TxnId, UndoEntry};
use crate::wal::WalOperation;

fn check_column_count(schema: &TableSchema, actual: usize) -> EngineResult<()> {
    if schema.column_count() != actual {
        return Err(EngineError::ColumnCountMismatch {
            table: schema.name().to_string(),
            expected: schema.column_count(),
            actual,
        });
    }
    Ok(())
}

fn check_record_size(data: &[u8]) -> EngineResult<()> {
    if data.len() > MAX_RECORD_SIZE {
        return Err(RecordError::RecordTooLarge {
            size: data.len(),
            max: MAX_RECORD_SIZE,
        }
        .into());
    }
    Ok(())
}

impl DatabaseContext {
    pub(crate) fn begin_transaction(&self) -> EngineResult<TxnId> {
        let txn = self.txns.begin();
        let _latch = lock(&self.latch);
        let lsn = self
            .wal
            .append_operation(&WalOperation::TxnBegin { txn_id: txn })?;
        self.txns.note_lsn(txn, lsn)?;
        Ok(txn)
    }

    /// Non-null foreign key values must exist in the referenced primary index
    fn check_foreign_keys(&self, schema: &TableSchema, values: &[Value]) -> EngineResult<()> {
        for fk in schema.foreign_keys() {
            let Some(value) = schema.find_column(&fk.column).and_then(|i| values.get(i)) else {
                return Err(EngineError::ColumnNotFound(
                    fk.column.clone(),
                    schema.name().to_string(),
                ));
            };
            if value.is_null() {
                continue;
            }

            let found = if fk.ref_table == schema.name() {
                // A row may reference itself
                let own_pk = schema.primary_key_index().and_then(|i| values.get(i));
                own_pk.is_some_and(|pk| pk.sql_eq(value))
                    || self.indexes.get(&fk.ref_table)?.search(&value.key_bytes())?.is_some()
            } else {
                self.indexes
                    .get(&fk.ref_table)?
                    .search(&value.key_bytes())?
                    .is_some()
            };
            if !found {
                return Err(EngineError::ForeignKeyViolation {
                    column: fk.column.clone(),
                    value: value.to_string(),
                    ref_table: fk.ref_table.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_unique_key(&self, handle: &TableHandle, values: &[Value]) -> EngineResult<()> {
        let Some(pk) = handle
            .schema
            .primary_key_index()
            .and_then(|i| values.get(i))
        else {
            return Ok(());
        };
        if handle.index.search(&pk.key_bytes())?.is_some() {
            return Err(EngineError::DuplicateKey {
                table: handle.schema.name().to_string(),
                key: pk.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert_row(
        &self,
        txn: TxnId,
        table: &str,
        values: Vec<Value>,
    ) -> EngineResult<RowPointer> {
        self.txns.ensure_active(txn)?;
        let handle = self.table(table)?;
        check_column_count(&handle.schema, values.len())?;
        let row = Row::new(values);
        let data = row.encode(&handle.schema)?;
        check_record_size(&data)?;

        let _latch = lock(&self.latch);
        self.check_foreign_keys(&handle.schema, row.values())?;
        self.check_unique_key(&handle, row.values())?;

        let lsn = self.wal.allocate_lsn();
        let rp = handle.heap.insert(&data, lsn)?;
        let op = WalOperation::Insert {
            txn_id: txn,
            table: table.to_string(),
            row_data: data,
            row_ptr: rp,
        };
        if let Err(e) = self.wal.append_to_buffer(&op, lsn) {
            if let Err(undo) = handle.heap.delete(&rp, lsn) {
                warn!("removing unlogged row {} of '{}' failed: {}", rp, table, undo);
            }
            return Err(e.into());
        }

        let key = row_key(&handle.schema, row.values(), &rp);
        if let Err(e) = handle.index.insert(&key, &rp.to_bytes()) {
            self.cancel_insert(&handle, &rp, lsn);
            return Err(e.into());
        }

        self.txns.note_lsn(txn, lsn)?;
        self.txns.record_insert(txn, table, rp, key)?;
        debug!("txn {} inserted {} into '{}'", txn, rp, table);
        Ok(rp)
    }

    /// Remove a logged row whose index entry could not be written and tell
    /// recovery to skip its insert record
    fn cancel_insert(&self, handle: &TableHandle, rp: &RowPointer, lsn: Lsn) {
        let cancelled = self
            .wal
            .append_operation(&WalOperation::Compensation { target_lsn: lsn })
            .map_err(EngineError::from)
            .and_then(|comp_lsn| handle.heap.delete(rp, comp_lsn).map_err(EngineError::from));
        if let Err(e) = cancelled {
            warn!(
                "cancelling insert of {} into '{}' failed: {}",
                rp,
                handle.schema.name(),
                e
            );
        }
    }

    /// Replace the row at `rp`. Returns where the row lives afterwards.
    pub(crate) fn update_row(
        &self,
        txn: TxnId,
        table: &str,
        rp: RowPointer,
        values: Vec<Value>,
    ) -> EngineResult<RowPointer> {
        self.txns.ensure_active(txn)?;
        let handle = self.table(table)?;
        check_column_count(&handle.schema, values.len())?;
        let row = Row::new(values);
        let data = row.encode(&handle.schema)?;
        check_record_size(&data)?;

        let _latch = lock(&self.latch);
        let old_data = self.row_data(&handle, &rp)?;
        let old_row = Row::decode(&old_data, &handle.schema)?;
        let old_key = row_key(&handle.schema, old_row.values(), &rp);

        self.check_foreign_keys(&handle.schema, row.values())?;
        if handle.schema.primary_key_index().is_some()
            && row_key(&handle.schema, row.values(), &rp) != old_key
        {
            self.check_unique_key(&handle, row.values())?;
        }

        let lsn = self.wal.allocate_lsn();
        let mut new_rp = rp;
        handle.heap.update(&mut new_rp, &data, lsn)?;
        let op = WalOperation::Update {
            txn_id: txn,
            table: table.to_string(),
            old_row_ptr: rp,
            new_row_ptr: new_rp,
            row_data: data,
            before_image: Some(old_data.clone()),
        };
        if let Err(e) = self.wal.append_to_buffer(&op, lsn) {
            let restored = self.put_back(&handle, &rp, &new_rp, &old_data, lsn);
            if let Err(undo) = restored {
                warn!("restoring unlogged update of {} in '{}' failed: {}", rp, table, undo);
            }
            return Err(e.into());
        }

        let new_key = row_key(&handle.schema, row.values(), &new_rp);
        self.txns.note_lsn(txn, lsn)?;
        self.txns.record_update(
            txn,
            table,
            rp,
            new_rp,
            old_data,
            old_key.clone(),
            new_key.clone(),
        )?;

        if old_key != new_key {
            handle.index.delete(&old_key)?;
        }
        handle.index.insert(&new_key, &new_rp.to_bytes())?;
        if new_rp != rp {
            debug!("txn {} moved row {} of '{}' to {}", txn, rp, table, new_rp);
        }
        Ok(new_rp)
    }

    pub(crate) fn delete_row(&self, txn: TxnId, table: &str, rp: RowPointer) -> EngineResult<()> {
        self.txns.ensure_active(txn)?;
        let handle = self.table(table)?;

        let _latch = lock(&self.latch);
        let old_data = self.row_data(&handle, &rp)?;
        let old_row = Row::decode(&old_data, &handle.schema)?;
        let key = row_key(&handle.schema, old_row.values(), &rp);

        let lsn = self.wal.allocate_lsn();
        handle.heap.delete(&rp, lsn)?;
        let op = WalOperation::Delete {
            txn_id: txn,
            table: table.to_string(),
            row_ptr: rp,
            before_image: Some(old_data.clone()),
        };
        if let Err(e) = self.wal.append_to_buffer(&op, lsn) {
            if let Err(undo) = handle.heap.restore(&rp, &old_data, lsn) {
                warn!("restoring unlogged delete of {} in '{}' failed: {}", rp, table, undo);
            }
            return Err(e.into());
        }

        self.txns.note_lsn(txn, lsn)?;
        self.txns
            .record_delete(txn, table, rp, old_data, key.clone())?;
        handle.index.delete(&key)?;
        debug!("txn {} deleted {} from '{}'", txn, rp, table);
        Ok(())
    }

    /// Put the before-image of an update back at `old`, dropping the copy
    /// at `new` if the row had moved
    fn put_back(
        &self,
        handle: &TableHandle,
        old: &RowPointer,
        new: &RowPointer,
        old_data: &[u8],
        lsn: Lsn,
    ) -> EngineResult<()> {
        if new != old && handle.heap.get(new).is_ok() {
            handle.heap.delete(new, lsn)?;
        }
        handle.heap.restore(old, old_data, lsn)?;
        Ok(())
    }

    /// The log sync is the commit point
    pub(crate) fn commit_transaction(&self, txn: TxnId) -> EngineResult<()> {
        self.txns.ensure_active(txn)?;
        {
            let _latch = lock(&self.latch);
            self.wal
                .append_operation(&WalOperation::TxnCommit { txn_id: txn })?;
        }
        self.wal.sync()?;
        self.pool.flush_all_pages()?;
        self.txns.commit(txn)?;
        Ok(())
    }

    /// Reverse the transaction's changes newest first. The abort record is
    /// not synced; recovery undoes the transaction again if needed.
    ///
    /// A failing undo entry does not stop the rest. The first failure is
    /// returned once every entry has been tried, and the log is synced so
    /// the next recovery finishes what was left live.
    pub(crate) fn abort_transaction(&self, txn: TxnId) -> EngineResult<()> {
        self.txns.ensure_active(txn)?;
        let _latch = lock(&self.latch);
        let lsn = self
            .wal
            .append_operation(&WalOperation::TxnAbort { txn_id: txn })?;
        let undo = self.txns.abort(txn)?;
        let changes = undo.len();
        let mut first_error = None;
        for entry in undo.into_iter().rev() {
            if let Err(e) = self.undo(entry, lsn) {
                warn!("txn {} abort: undo failed: {}", txn, e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            self.wal.sync()?;
            return Err(e);
        }
        debug!("txn {} aborted, {} changes reversed", txn, changes);
        Ok(())
    }

    fn undo(&self, entry: UndoEntry, lsn: Lsn) -> EngineResult<()> {
        match entry {
            UndoEntry::Insert {
                table,
                row_ptr,
                key,
            } => {
                let handle = self.table(&table)?;
                if handle.heap.get(&row_ptr).is_ok() {
                    handle.heap.delete(&row_ptr, lsn)?;
                }
                handle.index.delete(&key)?;
            }
            UndoEntry::Update {
                table,
                old_ptr,
                new_ptr,
                old_data,
                old_key,
                new_key,
            } => {
                let handle = self.table(&table)?;
                self.put_back(&handle, &old_ptr, &new_ptr, &old_data, lsn)?;
                if new_key != old_key {
                    handle.index.delete(&new_key)?;
                }
                handle.index.insert(&old_key, &old_ptr.to_bytes())?;
            }
            UndoEntry::Delete {
                table,
                row_ptr,
                old_data,
                key,
            } => {
                let handle = self.table(&table)?;
                handle.heap.restore(&row_ptr, &old_data, lsn)?;
                handle.index.insert(&key, &row_ptr.to_bytes())?;
            }
        }
        Ok(())
    }
}

impl StorageEngine {
    pub fn begin_transaction(&self) -> EngineResult<TxnId> {
        self.db()?.begin_transaction()
    }

    pub fn commit_transaction(&self, txn: TxnId) -> EngineResult<()> {
        self.db()?.commit_transaction(txn)
    }

    pub fn abort_transaction(&self, txn: TxnId) -> EngineResult<()> {
        self.db()?.abort_transaction(txn)
    }

    /// Insert a row. Returns the row's location.
    pub fn insert_row(&self, txn: TxnId, table: &str, values: Vec<Value>) -> EngineResult<RowPointer> {
        self.db()?
            .insert_row(txn, table, values)
            .map_err(|e| e.during("insert", table))
    }

    /// Replace the row at `rp` with `values`. A row that outgrows its page
    /// moves; the returned pointer is its new location.
    pub fn update_row(
        &self,
        txn: TxnId,
        table: &str,
        rp: RowPointer,
        values: Vec<Value>,
    ) -> EngineResult<RowPointer> {
        self.db()?
            .update_row(txn, table, rp, values)
            .map_err(|e| e.during("update", table))
    }

    pub fn delete_row(&self, txn: TxnId, table: &str, rp: RowPointer) -> EngineResult<()> {
        self.db()?
            .delete_row(txn, table, rp)
            .map_err(|e| e.during("delete", table))
    }
}
