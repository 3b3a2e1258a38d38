use super::*;
use crate::record::RowPointer;
use tempfile::TempDir;

fn insert_op(txn_id: u64, slot: u16) -> WalOperation {
    WalOperation::Insert {
        txn_id,
        table: "t".to_string(),
        row_data: vec![slot as u8; 8],
        row_ptr: RowPointer::new(1, 0, slot),
    }
}

fn replay_all(wal: &WalManager, start: Lsn) -> WalResult<Vec<(Lsn, WalOperation)>> {
    let mut out = Vec::new();
    wal.replay_from_lsn(start, |lsn, op| {
        out.push((lsn, op));
        Ok::<(), WalError>(())
    })?;
    Ok(out)
}

#[test]
fn test_append_sync_replay() {
    let temp_dir = TempDir::new().unwrap();
    let wal = WalManager::open(temp_dir.path()).unwrap();
    assert_eq!(wal.segment_ids(), vec![0]);
    assert!(temp_dir.path().join("wal_0000000000000000.log").exists());

    let lsn1 = wal.allocate_lsn();
    wal.append_to_buffer(&insert_op(1, 0), lsn1).unwrap();
    let lsn2 = wal.append_operation(&WalOperation::TxnCommit { txn_id: 1 }).unwrap();
    assert_eq!((lsn1, lsn2), (1, 2));
    assert_eq!(wal.flushed_lsn(), 0);

    assert_eq!(wal.sync().unwrap(), 2);
    assert_eq!(wal.flushed_lsn(), 2);

    let records = replay_all(&wal, 0).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], (1, insert_op(1, 0)));
    assert_eq!(records[1], (2, WalOperation::TxnCommit { txn_id: 1 }));

    // Records below the start LSN are skipped
    let tail = replay_all(&wal, 2).unwrap();
    assert_eq!(tail.len(), 1);
}

#[test]
fn test_reopen_continues_lsns() {
    let temp_dir = TempDir::new().unwrap();
    {
        let wal = WalManager::open(temp_dir.path()).unwrap();
        for slot in 0..5 {
            wal.append_operation(&insert_op(1, slot)).unwrap();
        }
        wal.sync().unwrap();
    }

    let wal = WalManager::open(temp_dir.path()).unwrap();
    assert_eq!(wal.current_lsn(), 5);
    assert_eq!(wal.flushed_lsn(), 5);
    assert_eq!(wal.allocate_lsn(), 6);
}

#[test]
fn test_segment_rollover() {
    let temp_dir = TempDir::new().unwrap();
    let record_len = encode_record(1, &insert_op(1, 0)).unwrap().len() as u64;
    let wal = WalManager::with_segment_size(temp_dir.path(), record_len * 3).unwrap();

    for slot in 0..7 {
        wal.append_operation(&insert_op(1, slot)).unwrap();
    }
    wal.sync().unwrap();
    assert_eq!(wal.segment_ids(), vec![0, 1, 2]);

    let lsns: Vec<Lsn> = replay_all(&wal, 0).unwrap().into_iter().map(|(l, _)| l).collect();
    assert_eq!(lsns, (1..=7).collect::<Vec<_>>());

    // Reopen finds every segment and the last LSN in the newest one
    drop(wal);
    let wal = WalManager::with_segment_size(temp_dir.path(), record_len * 3).unwrap();
    assert_eq!(wal.segment_ids(), vec![0, 1, 2]);
    assert_eq!(wal.current_lsn(), 7);
}

#[test]
fn test_oversized_record_gets_its_own_segment() {
    let temp_dir = TempDir::new().unwrap();
    let wal = WalManager::with_segment_size(temp_dir.path(), 16).unwrap();
    wal.append_operation(&insert_op(1, 0)).unwrap();
    wal.append_operation(&insert_op(1, 1)).unwrap();
    assert_eq!(wal.segment_ids(), vec![0, 1]);
}

#[test]
fn test_torn_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("wal_0000000000000000.log");
    let good_len;
    {
        let wal = WalManager::open(temp_dir.path()).unwrap();
        wal.append_operation(&insert_op(1, 0)).unwrap();
        wal.append_operation(&WalOperation::TxnCommit { txn_id: 1 }).unwrap();
        wal.sync().unwrap();
        good_len = std::fs::metadata(&path).unwrap().len();

        // Half of a third record
        let partial = encode_record(3, &insert_op(2, 1)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
    }

    let wal = WalManager::open(temp_dir.path()).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    assert_eq!(wal.current_lsn(), 2);
    assert_eq!(replay_all(&wal, 0).unwrap().len(), 2);

    // Appending after the cut keeps the log readable
    wal.append_operation(&insert_op(2, 1)).unwrap();
    assert_eq!(replay_all(&wal, 0).unwrap().len(), 3);
}

#[test]
fn test_corrupt_sealed_segment_fails_replay() {
    let temp_dir = TempDir::new().unwrap();
    let record_len = encode_record(1, &insert_op(1, 0)).unwrap().len() as u64;
    {
        let wal = WalManager::with_segment_size(temp_dir.path(), record_len * 2).unwrap();
        for slot in 0..4 {
            wal.append_operation(&insert_op(1, slot)).unwrap();
        }
        wal.sync().unwrap();
    }

    // Flip a payload byte in the first (sealed) segment
    let path = temp_dir.path().join("wal_0000000000000000.log");
    let mut data = std::fs::read(&path).unwrap();
    let last = data.len() - 2;
    data[last] ^= 0xff;
    std::fs::write(&path, data).unwrap();

    let wal = WalManager::with_segment_size(temp_dir.path(), record_len * 2).unwrap();
    let err = replay_all(&wal, 0).unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(err, WalError::ChecksumMismatch { segment: 0, .. }));
}

#[test]
fn test_remove_segments_before() {
    let temp_dir = TempDir::new().unwrap();
    let record_len = encode_record(1, &insert_op(1, 0)).unwrap().len() as u64;
    let wal = WalManager::with_segment_size(temp_dir.path(), record_len * 2).unwrap();
    for slot in 0..6 {
        wal.append_operation(&insert_op(1, slot)).unwrap();
    }
    // Segments: [1,2] [3,4] [5,6]
    assert_eq!(wal.segment_ids(), vec![0, 1, 2]);

    assert_eq!(wal.remove_segments_before(2).unwrap(), 0);
    assert_eq!(wal.remove_segments_before(4).unwrap(), 1);
    assert_eq!(wal.segment_ids(), vec![1, 2]);
    assert!(!temp_dir.path().join("wal_0000000000000000.log").exists());

    // The active segment always stays
    assert_eq!(wal.remove_segments_before(100).unwrap(), 1);
    assert_eq!(wal.segment_ids(), vec![2]);

    let lsns: Vec<Lsn> = replay_all(&wal, 0).unwrap().into_iter().map(|(l, _)| l).collect();
    assert_eq!(lsns, vec![5, 6]);
}

#[test]
fn test_log_flusher_for_buffer_pool() {
    let temp_dir = TempDir::new().unwrap();
    let wal = WalManager::open(temp_dir.path()).unwrap();
    wal.append_operation(&WalOperation::TxnBegin { txn_id: 4 }).unwrap();

    let flusher: &dyn LogFlusher = &wal;
    assert_eq!(flusher.flushed_lsn(), 0);
    assert_eq!(flusher.flush_log().unwrap(), 1);
    assert_eq!(flusher.flushed_lsn(), 1);
}

#[test]
fn test_seed_lsn_moves_forward_only() {
    let temp_dir = TempDir::new().unwrap();
    let wal = WalManager::open(temp_dir.path()).unwrap();
    wal.seed_lsn(40);
    assert_eq!(wal.flushed_lsn(), 40);
    assert_eq!(wal.allocate_lsn(), 41);

    wal.seed_lsn(10);
    assert_eq!(wal.current_lsn(), 41);
}

#[test]
fn test_segment_name_parsing() {
    assert_eq!(parse_segment_id("wal_000000000000001f.log"), Some(31));
    assert_eq!(parse_segment_id("wal_1f.log"), None);
    assert_eq!(parse_segment_id("checkpoint.json"), None);
}
