//! Transaction bookkeeping: ids, states and per-transaction undo logs.
//!
//! The manager does not touch data itself. The engine records every change it
//! makes on behalf of a transaction and replays the undo log backwards on
//! abort.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use log::debug;
use thiserror::Error;

use crate::file::Lsn;
use crate::record::RowPointer;
use crate::sync::lock;

pub type TxnId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxnError {
    #[error("Transaction {0} does not exist")]
    NotFound(TxnId),

    #[error("Transaction {0} is already committed")]
    AlreadyCommitted(TxnId),

    #[error("Transaction {0} is already aborted")]
    AlreadyAborted(TxnId),

    #[error("Transaction {0} has already finished")]
    Finished(TxnId),
}

pub type TxnResult<T> = Result<T, TxnError>;

/// Finished transactions whose outcome is remembered between checkpoints
pub const FINISHED_RETAINED: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// How to reverse one change
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    Insert {
        table: String,
        row_ptr: RowPointer,
        key: Vec<u8>,
    },
    Update {
        table: String,
        old_ptr: RowPointer,
        new_ptr: RowPointer,
        old_data: Vec<u8>,
        old_key: Vec<u8>,
        new_key: Vec<u8>,
    },
    Delete {
        table: String,
        row_ptr: RowPointer,
        old_data: Vec<u8>,
        key: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxnId,
    pub state: TxnState,
    /// Changes in execution order
    pub undo_log: Vec<UndoEntry>,
    /// LSN of the transaction's first log record
    pub first_lsn: Option<Lsn>,
}

impl Transaction {
    fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TxnState::Active,
            undo_log: Vec::new(),
            first_lsn: None,
        }
    }
}

pub struct TransactionManager {
    next_id: AtomicU64,
    active: Mutex<AHashMap<TxnId, Transaction>>,
    /// Outcomes of recently finished transactions, oldest id first. Any id
    /// below `next_id` that is neither active nor here has finished too.
    finished: Mutex<BTreeMap<TxnId, TxnState>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(AHashMap::new()),
            finished: Mutex::new(BTreeMap::new()),
        }
    }

    /// Make sure future ids are at least `next`. Used after recovery so new
    /// transactions never reuse an id found in the log.
    pub fn seed_next_id(&self, next: TxnId) {
        self.next_id.fetch_max(next, Ordering::SeqCst);
    }

    pub fn begin(&self) -> TxnId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.active).insert(id, Transaction::new(id));
        debug!("began transaction {}", id);
        id
    }

    fn finished_error(&self, id: TxnId) -> TxnError {
        match lock(&self.finished).get(&id) {
            Some(TxnState::Committed) => TxnError::AlreadyCommitted(id),
            Some(TxnState::Aborted) => TxnError::AlreadyAborted(id),
            _ if id > 0 && id < self.next_id.load(Ordering::SeqCst) => TxnError::Finished(id),
            _ => TxnError::NotFound(id),
        }
    }

    fn with_active<T>(&self, id: TxnId, f: impl FnOnce(&mut Transaction) -> T) -> TxnResult<T> {
        let mut active = lock(&self.active);
        match active.get_mut(&id) {
            Some(txn) => Ok(f(txn)),
            None => {
                drop(active);
                Err(self.finished_error(id))
            }
        }
    }

    fn finish(&self, id: TxnId, state: TxnState) -> TxnResult<Transaction> {
        let mut txn = lock(&self.active)
            .remove(&id)
            .ok_or_else(|| self.finished_error(id))?;
        txn.state = state;
        let mut finished = lock(&self.finished);
        finished.insert(id, state);
        while finished.len() > FINISHED_RETAINED {
            finished.pop_first();
        }
        drop(finished);
        debug!("transaction {} is now {:?}", id, state);
        Ok(txn)
    }

    /// Active → Committed
    pub fn commit(&self, id: TxnId) -> TxnResult<()> {
        self.finish(id, TxnState::Committed).map(|_| ())
    }

    /// Active → Aborted. Hands back the undo log, newest change last.
    pub fn abort(&self, id: TxnId) -> TxnResult<Vec<UndoEntry>> {
        self.finish(id, TxnState::Aborted).map(|txn| txn.undo_log)
    }

    pub fn ensure_active(&self, id: TxnId) -> TxnResult<()> {
        self.with_active(id, |_| ())
    }

    /// Remember the first log record written for `id`
    pub fn note_lsn(&self, id: TxnId, lsn: Lsn) -> TxnResult<()> {
        self.with_active(id, |txn| {
            txn.first_lsn.get_or_insert(lsn);
        })
    }

    pub fn record_insert(&self, id: TxnId, table: &str, row_ptr: RowPointer, key: Vec<u8>) -> TxnResult<()> {
        self.with_active(id, |txn| {
            txn.undo_log.push(UndoEntry::Insert {
                table: table.to_string(),
                row_ptr,
                key,
            })
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_update(
        &self,
        id: TxnId,
        table: &str,
        old_ptr: RowPointer,
        new_ptr: RowPointer,
        old_data: Vec<u8>,
        old_key: Vec<u8>,
        new_key: Vec<u8>,
    ) -> TxnResult<()> {
        self.with_active(id, |txn| {
            txn.undo_log.push(UndoEntry::Update {
                table: table.to_string(),
                old_ptr,
                new_ptr,
                old_data,
                old_key,
                new_key,
            })
        })
    }

    pub fn record_delete(
        &self,
        id: TxnId,
        table: &str,
        row_ptr: RowPointer,
        old_data: Vec<u8>,
        key: Vec<u8>,
    ) -> TxnResult<()> {
        self.with_active(id, |txn| {
            txn.undo_log.push(UndoEntry::Delete {
                table: table.to_string(),
                row_ptr,
                old_data,
                key,
            })
        })
    }

    /// `None` for unknown ids and for finished ones already forgotten
    pub fn state(&self, id: TxnId) -> Option<TxnState> {
        if lock(&self.active).contains_key(&id) {
            return Some(TxnState::Active);
        }
        lock(&self.finished).get(&id).copied()
    }

    pub fn transaction(&self, id: TxnId) -> Option<Transaction> {
        lock(&self.active).get(&id).cloned()
    }

    pub fn active_ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = lock(&self.active).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop remembered outcomes. Called once a checkpoint no longer needs
    /// them; later calls on those ids fail with `Finished`.
    pub fn forget_finished(&self) -> usize {
        let mut finished = lock(&self.finished);
        let forgotten = finished.len();
        finished.clear();
        forgotten
    }

    pub fn finished_count(&self) -> usize {
        lock(&self.finished).len()
    }

    /// Smallest first LSN among active transactions. A checkpoint must not
    /// start replay after it.
    pub fn oldest_active_lsn(&self) -> Option<Lsn> {
        lock(&self.active).values().filter_map(|txn| txn.first_lsn).min()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let tm = TransactionManager::new();
        let a = tm.begin();
        let b = tm.begin();
        assert!(b > a);
        assert_eq!(tm.state(a), Some(TxnState::Active));

        tm.commit(a).unwrap();
        assert_eq!(tm.state(a), Some(TxnState::Committed));
        assert_eq!(tm.abort(a), Err(TxnError::AlreadyCommitted(a)));
        assert_eq!(tm.commit(a), Err(TxnError::AlreadyCommitted(a)));

        tm.abort(b).unwrap();
        assert_eq!(tm.commit(b), Err(TxnError::AlreadyAborted(b)));
        assert_eq!(tm.ensure_active(99), Err(TxnError::NotFound(99)));
        assert!(tm.active_ids().is_empty());
    }

    #[test]
    fn test_undo_log_order() {
        let tm = TransactionManager::new();
        let id = tm.begin();
        let rp = RowPointer::new(1, 0, 0);
        tm.record_insert(id, "t", rp, vec![1]).unwrap();
        tm.record_update(id, "t", rp, rp, vec![9], vec![1], vec![1]).unwrap();
        tm.record_delete(id, "t", rp, vec![8], vec![1]).unwrap();

        let undo = tm.abort(id).unwrap();
        assert_eq!(undo.len(), 3);
        assert!(matches!(undo[0], UndoEntry::Insert { .. }));
        assert!(matches!(undo[2], UndoEntry::Delete { .. }));

        assert_eq!(
            tm.record_insert(id, "t", rp, vec![2]),
            Err(TxnError::AlreadyAborted(id))
        );
    }

    #[test]
    fn test_first_lsn_tracking() {
        let tm = TransactionManager::new();
        let a = tm.begin();
        let b = tm.begin();
        assert_eq!(tm.oldest_active_lsn(), None);

        tm.note_lsn(b, 12).unwrap();
        tm.note_lsn(a, 20).unwrap();
        tm.note_lsn(b, 30).unwrap();
        assert_eq!(tm.transaction(b).unwrap().first_lsn, Some(12));
        assert_eq!(tm.oldest_active_lsn(), Some(12));

        tm.commit(b).unwrap();
        assert_eq!(tm.oldest_active_lsn(), Some(20));
    }

    #[test]
    fn test_finished_outcomes_are_bounded() {
        let tm = TransactionManager::new();
        let first = tm.begin();
        tm.abort(first).unwrap();
        for _ in 0..FINISHED_RETAINED + 10 {
            let id = tm.begin();
            tm.commit(id).unwrap();
        }
        assert_eq!(tm.finished_count(), FINISHED_RETAINED);
        // The oldest outcome was dropped but the id still reads as finished
        assert_eq!(tm.state(first), None);
        assert_eq!(tm.commit(first), Err(TxnError::Finished(first)));

        let last = tm.begin();
        tm.commit(last).unwrap();
        assert_eq!(tm.commit(last), Err(TxnError::AlreadyCommitted(last)));

        assert_eq!(tm.forget_finished(), FINISHED_RETAINED);
        assert_eq!(tm.finished_count(), 0);
        assert_eq!(tm.ensure_active(last), Err(TxnError::Finished(last)));
        assert_eq!(tm.ensure_active(last + 1), Err(TxnError::NotFound(last + 1)));
    }

    #[test]
    fn test_seed_next_id() {
        let tm = TransactionManager::new();
        tm.seed_next_id(50);
        assert_eq!(tm.begin(), 50);
        // Seeding never moves backwards
        tm.seed_next_id(10);
        assert_eq!(tm.begin(), 51);
    }
}
