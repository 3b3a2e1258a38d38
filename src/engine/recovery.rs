//! Crash recovery
//!
//! 1. Replay the log from the checkpoint LSN and sort out which
//!    transactions committed, which aborted, and which records were
//!    cancelled by a compensation record.
//! 2. REDO, oldest first: tables are recreated and committed row changes
//!    are applied to every heap page whose LSN is behind the record.
//! 3. UNDO, newest first: row changes of transactions that never committed
//!    are reversed from the before-images in the log, unless a later
//!    committed change touched the same row pointer.
//! 4. Primary indexes of tables the log touched are rebuilt from their heaps,
//!    then everything is flushed and a new checkpoint is written.

use ahash::{AHashMap, AHashSet};
use log::{debug, info, warn};

use super::error::{EngineError, EngineResult};
use super::{DatabaseContext, row_key};
use crate::file::Lsn;
use crate::record::{Row, RowPointer, TableSchema};
use crate::sync::lock;
use crate::txn::TxnId;
use crate::wal::WalOperation;

/// What one recovery run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Checkpoint LSN replay started from
    pub start_lsn: Lsn,
    /// Log records read
    pub records: usize,
    /// Records applied during REDO
    pub redone: usize,
    /// Records reversed during UNDO
    pub undone: usize,
    /// Transactions that never committed
    pub losers: Vec<TxnId>,
    pub rebuilt_indexes: Vec<String>,
}

/// Transaction outcomes found in the log
#[derive(Default)]
struct LogSummary {
    committed: AHashSet<TxnId>,
    aborted: AHashSet<TxnId>,
    compensated: AHashSet<Lsn>,
    with_changes: AHashSet<TxnId>,
    max_txn: TxnId,
}

impl LogSummary {
    fn scan(records: &[(Lsn, WalOperation)]) -> Self {
        let mut summary = Self::default();
        for (_, op) in records {
            match op {
                WalOperation::TxnCommit { txn_id } => {
                    summary.committed.insert(*txn_id);
                }
                WalOperation::TxnAbort { txn_id } => {
                    summary.aborted.insert(*txn_id);
                }
                WalOperation::Compensation { target_lsn } => {
                    summary.compensated.insert(*target_lsn);
                }
                _ => {}
            }
            if let Some(txn) = op.txn_id() {
                summary.max_txn = summary.max_txn.max(txn);
                if op.is_dml() && txn != 0 {
                    summary.with_changes.insert(txn);
                }
            }
        }
        summary
    }

    /// Transaction id 0 marks work done outside any transaction
    fn is_winner(&self, txn: TxnId) -> bool {
        txn == 0 || self.committed.contains(&txn)
    }

    fn losers(&self) -> Vec<TxnId> {
        let mut losers: Vec<TxnId> = self
            .with_changes
            .iter()
            .copied()
            .filter(|txn| !self.committed.contains(txn))
            .collect();
        losers.sort_unstable();
        losers
    }
}

/// Row pointers a DML record wrote to
fn touched_pointers(op: &WalOperation) -> Vec<RowPointer> {
    match op {
        WalOperation::Insert { row_ptr, .. } | WalOperation::Delete { row_ptr, .. } => {
            vec![*row_ptr]
        }
        WalOperation::Update {
            old_row_ptr,
            new_row_ptr,
            ..
        } => vec![*old_row_ptr, *new_row_ptr],
        _ => Vec::new(),
    }
}

impl DatabaseContext {
    pub(crate) fn recover(&self) -> EngineResult<RecoveryStats> {
        let _latch = lock(&self.latch);
        let active = self.txns.active_ids();
        if !active.is_empty() {
            return Err(EngineError::TransactionsActive(active));
        }
        let checkpoint = self.checkpoints.load();
        self.wal.seed_lsn(checkpoint.lsn);

        let mut records = Vec::new();
        self.wal.replay_from_lsn(checkpoint.lsn, |lsn, op| {
            records.push((lsn, op));
            Ok::<(), EngineError>(())
        })?;
        records.sort_by_key(|(lsn, _)| *lsn);

        let summary = LogSummary::scan(&records);
        let mut stats = RecoveryStats {
            start_lsn: checkpoint.lsn,
            records: records.len(),
            losers: summary.losers(),
            ..RecoveryStats::default()
        };

        let mut touched_tables = AHashSet::new();
        stats.redone = self.redo(&records, &summary, &mut touched_tables)?;
        stats.undone = self.undo_losers(&records, &summary, &stats.losers)?;
        stats.rebuilt_indexes = self.rebuild_indexes(&touched_tables)?;
        self.txns.seed_next_id(summary.max_txn + 1);

        self.write_checkpoint()?;
        info!(
            "recovered '{}' from LSN {}: {} records, {} redone, {} undone, {} losers, {} indexes rebuilt",
            self.name,
            stats.start_lsn,
            stats.records,
            stats.redone,
            stats.undone,
            stats.losers.len(),
            stats.rebuilt_indexes.len()
        );
        Ok(stats)
    }

    fn redo(
        &self,
        records: &[(Lsn, WalOperation)],
        summary: &LogSummary,
        touched_tables: &mut AHashSet<String>,
    ) -> EngineResult<usize> {
        let mut redone = 0;
        for (lsn, op) in records {
            if summary.compensated.contains(lsn) {
                debug!("skipping compensated {} at LSN {}", op.name(), lsn);
                continue;
            }
            if let WalOperation::CreateTable { schema } = op {
                self.redo_create_table(schema)?;
                continue;
            }
            let (Some(txn), Some(table)) = (op.txn_id(), op.table()) else {
                continue;
            };
            if !op.is_dml() {
                continue;
            }
            touched_tables.insert(table.to_string());
            if !summary.is_winner(txn) {
                continue;
            }

            let heap = self.heaps.get(table)?;
            let applied = match op {
                WalOperation::Insert {
                    row_data, row_ptr, ..
                } => heap.redo_insert(row_ptr, row_data, *lsn)?,
                WalOperation::Update {
                    old_row_ptr,
                    new_row_ptr,
                    row_data,
                    ..
                } => heap.redo_update(old_row_ptr, new_row_ptr, row_data, *lsn)?,
                WalOperation::Delete { row_ptr, .. } => heap.redo_delete(row_ptr, *lsn)?,
                _ => false,
            };
            if applied {
                redone += 1;
            }
        }
        Ok(redone)
    }

    fn redo_create_table(&self, schema: &TableSchema) -> EngineResult<()> {
        if self.catalog.contains(schema.name()) {
            return Ok(());
        }
        let files = self.catalog.register_table(schema)?;
        self.open_table_files(schema.name(), files)?;
        info!("recreated table '{}' from the log", schema.name());
        Ok(())
    }

    fn undo_losers(
        &self,
        records: &[(Lsn, WalOperation)],
        summary: &LogSummary,
        losers: &[TxnId],
    ) -> EngineResult<usize> {
        if losers.is_empty() {
            return Ok(0);
        }

        // Page changes made here are stamped with the LSN of a logged abort
        let mut undo_lsn = 0;
        for &txn in losers {
            undo_lsn = self
                .wal
                .append_operation(&WalOperation::TxnAbort { txn_id: txn })?;
        }

        let mut last_committed: AHashMap<RowPointer, Lsn> = AHashMap::new();
        for (lsn, op) in records {
            if op.is_dml()
                && op.txn_id().is_some_and(|txn| summary.is_winner(txn))
                && !summary.compensated.contains(lsn)
            {
                for rp in touched_pointers(op) {
                    last_committed.insert(rp, *lsn);
                }
            }
        }
        let overwritten_later = |rp: &RowPointer, lsn: Lsn| {
            last_committed.get(rp).is_some_and(|&committed| committed > lsn)
        };

        let mut undone = 0;
        for (lsn, op) in records.iter().rev() {
            let Some(txn) = op.txn_id() else {
                continue;
            };
            if !op.is_dml() || summary.is_winner(txn) || summary.compensated.contains(lsn) {
                continue;
            }
            if touched_pointers(op).iter().any(|rp| overwritten_later(rp, *lsn)) {
                debug!("not undoing {} at LSN {}: row changed by a later commit", op.name(), lsn);
                continue;
            }

            let Some(table) = op.table() else {
                continue;
            };
            let heap = self.heaps.get(table)?;
            match op {
                WalOperation::Insert { row_ptr, .. } => {
                    if heap.get(row_ptr).is_ok() {
                        heap.delete(row_ptr, undo_lsn)?;
                        undone += 1;
                    }
                }
                WalOperation::Delete {
                    row_ptr,
                    before_image,
                    ..
                } => match before_image {
                    Some(image) => {
                        heap.restore(row_ptr, image, undo_lsn)?;
                        undone += 1;
                    }
                    None => warn!(
                        "cannot undo delete at LSN {} of txn {}: no before-image",
                        lsn, txn
                    ),
                },
                WalOperation::Update {
                    old_row_ptr,
                    new_row_ptr,
                    before_image,
                    ..
                } => {
                    let Some(image) = before_image else {
                        warn!(
                            "cannot undo update at LSN {} of txn {}: no before-image",
                            lsn, txn
                        );
                        continue;
                    };
                    if new_row_ptr != old_row_ptr && heap.get(new_row_ptr).is_ok() {
                        heap.delete(new_row_ptr, undo_lsn)?;
                    }
                    heap.restore(old_row_ptr, image, undo_lsn)?;
                    undone += 1;
                }
                _ => {}
            }
        }
        Ok(undone)
    }

    /// Rebuild the primary index of every table the log touched or whose
    /// persisted root is unreadable
    fn rebuild_indexes(&self, touched_tables: &AHashSet<String>) -> EngineResult<Vec<String>> {
        let mut rebuilt = Vec::new();
        for table in self.catalog.table_names() {
            let handle = self.table(&table)?;
            if !touched_tables.contains(&table) && handle.index.root_is_valid() {
                continue;
            }

            let mut entries = Vec::new();
            for (rp, data) in handle.heap.scan_rows()? {
                let row = Row::decode(&data, &handle.schema)?;
                entries.push((row_key(&handle.schema, row.values(), &rp), rp.to_bytes().to_vec()));
            }
            drop(handle);
            self.indexes.rebuild(&table, entries)?;
            rebuilt.push(table);
        }
        Ok(rebuilt)
    }
}
