use super::*;
use crate::record::{ColumnDef, DataType};
use crate::txn::TxnError;
use std::fs;
use tempfile::TempDir;

fn users_schema() -> TableSchema {
    TableSchema::new(
        "t",
        vec![
            ColumnDef::new("id", DataType::Int).primary_key(),
            ColumnDef::new("name", DataType::Varchar(32)),
        ],
    )
}

fn user(id: i32, name: &str) -> Vec<Value> {
    vec![Value::Int(id), Value::Str(name.to_string())]
}

fn setup_test_engine() -> (TempDir, StorageEngine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::new(temp_dir.path()).unwrap();
    engine.create_database("db").unwrap();
    engine.use_database("db").unwrap();
    (temp_dir, engine)
}

fn reopen(temp_dir: &TempDir) -> (StorageEngine, RecoveryStats) {
    let engine = StorageEngine::new(temp_dir.path()).unwrap();
    let stats = engine.use_database("db").unwrap();
    (engine, stats)
}

/// Lose the process without closing anything
fn crash(engine: StorageEngine) {
    std::mem::forget(engine);
}

fn insert(engine: &StorageEngine, table: &str, values: Vec<Value>) -> EngineResult<RowPointer> {
    engine.auto_commit(|e, txn| e.insert_row(txn, table, values))
}

fn find(engine: &StorageEngine, table: &str, id: i32) -> Vec<Vec<Value>> {
    engine
        .execute_select(&SelectPayload::table(table).filter("id", Value::Int(id)))
        .unwrap()
        .rows
}

fn root_cause(err: &EngineError) -> &EngineError {
    match err {
        EngineError::Operation { source, .. } => source.as_ref(),
        other => other,
    }
}

#[test]
fn test_create_and_show_databases() {
    let (_temp, engine) = setup_test_engine();
    engine.create_database("db1").unwrap();
    engine.create_database("db2").unwrap();
    assert_eq!(engine.show_databases().unwrap(), vec!["db", "db1", "db2"]);

    let dup = engine.create_database("db1").unwrap_err();
    assert!(matches!(dup, EngineError::DatabaseExists(_)));
    assert_eq!(dup.kind(), ErrorKind::Constraint);

    assert!(matches!(
        engine.create_database("../escape"),
        Err(EngineError::InvalidDatabaseName(_))
    ));
    let missing = engine.use_database("nonexistent").unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    assert_eq!(engine.current_database().as_deref(), Some("db"));
}

#[test]
fn test_no_database_selected() {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::new(temp_dir.path()).unwrap();
    let err = engine.create_table(users_schema()).unwrap_err();
    assert!(matches!(err, EngineError::NoDatabaseSelected));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(engine.begin_transaction().is_err());
}

#[test]
fn test_create_table_survives_reopen() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();

    let dup = engine.create_table(users_schema()).unwrap_err();
    assert!(matches!(root_cause(&dup), EngineError::TableExists(_)));
    drop(engine);

    let (engine, _) = reopen(&temp_dir);
    assert_eq!(engine.table_names().unwrap(), vec!["t".to_string()]);
    assert_eq!(engine.table_schema("t").unwrap(), users_schema());
    assert!(temp_dir.path().join("db/indexes/t_primary.idx").exists());
    assert!(temp_dir.path().join("db/checkpoint.json").exists());
}

#[test]
fn test_invalid_foreign_key_target() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();

    let bad = TableSchema::new(
        "orders",
        vec![
            ColumnDef::new("id", DataType::Int).primary_key(),
            ColumnDef::new("user_name", DataType::Varchar(32)),
        ],
    )
    .with_foreign_key("user_name", "t", "name");
    let err = engine.create_table(bad).unwrap_err();
    assert!(matches!(root_cause(&err), EngineError::InvalidForeignKey { .. }));
    assert!(!engine.table_names().unwrap().contains(&"orders".to_string()));
}

#[test]
fn test_durability_after_commit() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();

    let txn = engine.begin_transaction().unwrap();
    engine.insert_row(txn, "t", user(1, "a")).unwrap();
    engine.insert_row(txn, "t", user(2, "b")).unwrap();
    engine.commit_transaction(txn).unwrap();
    crash(engine);

    let (engine, stats) = reopen(&temp_dir);
    assert!(stats.losers.is_empty());
    assert_eq!(find(&engine, "t", 1), vec![user(1, "a")]);
    assert_eq!(find(&engine, "t", 2), vec![user(2, "b")]);
}

#[test]
fn test_uncommitted_insert_is_lost() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    insert(&engine, "t", user(1, "a")).unwrap();

    let txn = engine.begin_transaction().unwrap();
    engine.insert_row(txn, "t", user(3, "c")).unwrap();
    assert_eq!(find(&engine, "t", 3).len(), 1);
    crash(engine);

    let (engine, stats) = reopen(&temp_dir);
    assert_eq!(stats.losers, vec![txn]);
    assert!(find(&engine, "t", 3).is_empty());
    assert_eq!(engine.scan("t").unwrap().len(), 1);

    // New transactions never reuse the loser's id
    assert!(engine.begin_transaction().unwrap() > txn);
}

#[test]
fn test_flushed_uncommitted_changes_are_undone() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    let rp = insert(&engine, "t", user(1, "one")).unwrap();

    let loser = engine.begin_transaction().unwrap();
    engine.update_row(loser, "t", rp, user(1, "changed")).unwrap();
    engine.insert_row(loser, "t", user(10, "ten")).unwrap();
    // This commit flushes every page, the loser's changes included
    insert(&engine, "t", user(11, "eleven")).unwrap();
    crash(engine);

    let (engine, stats) = reopen(&temp_dir);
    assert_eq!(stats.losers, vec![loser]);
    assert!(stats.undone >= 2);
    assert!(stats.rebuilt_indexes.contains(&"t".to_string()));

    assert_eq!(find(&engine, "t", 1), vec![user(1, "one")]);
    assert!(find(&engine, "t", 10).is_empty());
    assert_eq!(find(&engine, "t", 11), vec![user(11, "eleven")]);
    assert_eq!(engine.scan("t").unwrap().len(), 2);
}

#[test]
fn test_lost_heap_file_is_rebuilt_from_log() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    for id in 1..=5 {
        insert(&engine, "t", user(id, &format!("user{}", id))).unwrap();
    }
    let heap_id = engine.db().unwrap().catalog.files("t").unwrap().heap_file_id;
    crash(engine);

    fs::write(
        temp_dir.path().join(format!("db/tables/{}.heap", heap_id)),
        b"",
    )
    .unwrap();

    let (engine, stats) = reopen(&temp_dir);
    assert_eq!(stats.redone, 5);
    assert_eq!(engine.scan("t").unwrap().len(), 5);
    assert_eq!(find(&engine, "t", 4), vec![user(4, "user4")]);
}

#[test]
fn test_repeated_recovery_is_stable() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    insert(&engine, "t", user(1, "a")).unwrap();
    let txn = engine.begin_transaction().unwrap();
    engine.insert_row(txn, "t", user(2, "b")).unwrap();
    crash(engine);

    let (engine, _) = reopen(&temp_dir);
    let first = engine.scan("t").unwrap();
    crash(engine);

    let (engine, stats) = reopen(&temp_dir);
    assert!(stats.losers.is_empty());
    assert_eq!(engine.scan("t").unwrap(), first);
    assert_eq!(first.len(), 1);
}

#[test]
fn test_foreign_key_violation_rolls_back() {
    let (_temp, engine) = setup_test_engine();
    engine
        .create_table(TableSchema::new(
            "a",
            vec![ColumnDef::new("id", DataType::Int).primary_key()],
        ))
        .unwrap();
    engine
        .create_table(
            TableSchema::new(
                "b",
                vec![
                    ColumnDef::new("id", DataType::Int).primary_key(),
                    ColumnDef::new("aid", DataType::Int),
                ],
            )
            .with_foreign_key("aid", "a", "id"),
        )
        .unwrap();
    insert(&engine, "a", vec![Value::Int(7)]).unwrap();

    let err = insert(&engine, "b", vec![Value::Int(1), Value::Int(99)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert!(matches!(
        root_cause(&err),
        EngineError::ForeignKeyViolation { .. }
    ));
    assert!(err.to_string().contains("insert on table b"));
    assert!(engine.scan("b").unwrap().is_empty());
    assert_eq!(engine.scan("a").unwrap().len(), 1);

    // Matching and NULL references are accepted
    insert(&engine, "b", vec![Value::Int(1), Value::Int(7)]).unwrap();
    insert(&engine, "b", vec![Value::Int(2), Value::Null]).unwrap();
    assert_eq!(engine.scan("b").unwrap().len(), 2);
}

#[test]
fn test_grow_update_moves_row() {
    let (temp_dir, engine) = setup_test_engine();
    engine
        .create_table(TableSchema::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::Int).primary_key(),
                ColumnDef::new("name", DataType::Varchar(4000)),
            ],
        ))
        .unwrap();

    let old_rp = insert(&engine, "t", user(1, "x")).unwrap();
    // Leaves too little room on page 0 for row 1 to grow
    insert(&engine, "t", user(2, &"f".repeat(4000))).unwrap();

    let grown = "x".repeat(100);
    let new_rp = engine
        .auto_commit(|e, txn| e.update_row(txn, "t", old_rp, user(1, &grown)))
        .unwrap();
    assert_ne!(new_rp, old_rp);
    assert_eq!(new_rp.page_number, 1);

    assert_eq!(find(&engine, "t", 1), vec![user(1, &grown)]);
    assert!(matches!(
        engine.get_row("t", &old_rp),
        Err(EngineError::RowNotFound { .. })
    ));
    let err = engine
        .auto_commit(|e, txn| e.delete_row(txn, "t", old_rp))
        .unwrap_err();
    assert!(matches!(root_cause(&err), EngineError::RowNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_row("t", &new_rp).unwrap().into_values(), user(1, &grown));

    crash(engine);
    let (engine, _) = reopen(&temp_dir);
    assert_eq!(find(&engine, "t", 1), vec![user(1, &grown)]);
}

#[test]
fn test_abort_rolls_back_changes() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    let one = insert(&engine, "t", user(1, "one")).unwrap();
    let two = insert(&engine, "t", user(2, "two")).unwrap();

    let txn = engine.begin_transaction().unwrap();
    engine.insert_row(txn, "t", user(3, "three")).unwrap();
    engine
        .update_row(txn, "t", one, user(1, "a much longer replacement name"))
        .unwrap();
    engine.delete_row(txn, "t", two).unwrap();
    assert!(find(&engine, "t", 2).is_empty());
    engine.abort_transaction(txn).unwrap();

    assert_eq!(find(&engine, "t", 1), vec![user(1, "one")]);
    assert_eq!(find(&engine, "t", 2), vec![user(2, "two")]);
    assert!(find(&engine, "t", 3).is_empty());
    assert_eq!(engine.get_row("t", &one).unwrap().into_values(), user(1, "one"));

    let err = engine.commit_transaction(txn).unwrap_err();
    assert!(matches!(err, EngineError::TxnError(TxnError::AlreadyAborted(_))));
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_primary_key_changes() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    let rp = insert(&engine, "t", user(1, "one")).unwrap();
    insert(&engine, "t", user(2, "two")).unwrap();

    let dup = insert(&engine, "t", user(1, "again")).unwrap_err();
    assert!(matches!(root_cause(&dup), EngineError::DuplicateKey { .. }));
    let clash = engine
        .auto_commit(|e, txn| e.update_row(txn, "t", rp, user(2, "clash")))
        .unwrap_err();
    assert_eq!(clash.kind(), ErrorKind::Constraint);

    engine
        .auto_commit(|e, txn| e.update_row(txn, "t", rp, user(5, "one")))
        .unwrap();
    assert!(find(&engine, "t", 1).is_empty());
    assert_eq!(find(&engine, "t", 5), vec![user(5, "one")]);
}

#[test]
fn test_row_checks() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();

    let short = insert(&engine, "t", vec![Value::Int(1)]).unwrap_err();
    assert!(matches!(
        root_cause(&short),
        EngineError::ColumnCountMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));

    let wrong = insert(&engine, "t", vec![Value::Str("1".into()), Value::Null]).unwrap_err();
    assert!(matches!(
        root_cause(&wrong),
        EngineError::RecordError(RecordError::TypeMismatch { .. })
    ));
    assert_eq!(wrong.kind(), ErrorKind::Constraint);

    let missing = insert(&engine, "nope", user(1, "a")).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    assert!(engine.scan("t").unwrap().is_empty());
}

#[test]
fn test_table_without_primary_key() {
    let (_temp, engine) = setup_test_engine();
    engine
        .create_table(TableSchema::new(
            "log",
            vec![ColumnDef::new("msg", DataType::Varchar(16))],
        ))
        .unwrap();

    let row = vec![Value::Str("same".into())];
    let first = insert(&engine, "log", row.clone()).unwrap();
    insert(&engine, "log", row.clone()).unwrap();
    assert_eq!(engine.scan("log").unwrap().len(), 2);

    engine
        .auto_commit(|e, txn| e.delete_row(txn, "log", first))
        .unwrap();
    assert_eq!(engine.scan("log").unwrap().len(), 1);
    let index = engine.db().unwrap().indexes.get("log").unwrap();
    assert_eq!(index.len().unwrap(), 1);
    assert!(index.search(&first.to_bytes()).unwrap().is_none());
}

#[test]
fn test_select_paths() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    for (id, name) in [(1, "ann"), (2, "bob"), (3, "ann")] {
        insert(&engine, "t", user(id, name)).unwrap();
    }

    let all = engine.execute_select(&SelectPayload::table("t")).unwrap();
    assert_eq!(all.columns, vec!["id", "name"]);
    assert_eq!(all.len(), 3);

    let anns = engine
        .execute_select(&SelectPayload::table("t").filter("name", Value::Str("ann".into())))
        .unwrap();
    assert_eq!(anns.rows, vec![user(1, "ann"), user(3, "ann")]);

    assert!(find(&engine, "t", 42).is_empty());
    let nulls = engine
        .execute_select(&SelectPayload::table("t").filter("name", Value::Null))
        .unwrap();
    assert!(nulls.is_empty());

    let err = engine
        .execute_select(&SelectPayload::table("t").filter("age", Value::Int(1)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_join_kinds() {
    let (_temp, engine) = setup_test_engine();
    engine
        .create_table(TableSchema::new(
            "a",
            vec![
                ColumnDef::new("id", DataType::Int).primary_key(),
                ColumnDef::new("name", DataType::Varchar(8)),
            ],
        ))
        .unwrap();
    engine
        .create_table(TableSchema::new(
            "b",
            vec![
                ColumnDef::new("id", DataType::Int).primary_key(),
                ColumnDef::new("aid", DataType::Int),
            ],
        ))
        .unwrap();
    for (id, name) in [(1, "x"), (2, "y"), (3, "z")] {
        insert(&engine, "a", vec![Value::Int(id), Value::Str(name.into())]).unwrap();
    }
    for (id, aid) in [(10, Some(1)), (11, Some(1)), (12, Some(4)), (13, None)] {
        let aid = aid.map_or(Value::Null, Value::Int);
        insert(&engine, "b", vec![Value::Int(id), aid]).unwrap();
    }

    let join = |kind| {
        engine
            .execute_select(&SelectPayload::table("a").join(kind, "b", "id", "aid"))
            .unwrap()
    };
    let inner = join(JoinKind::Inner);
    assert_eq!(inner.columns, vec!["a.id", "a.name", "b.id", "b.aid"]);
    assert_eq!(inner.len(), 2);
    assert_eq!(join(JoinKind::Left).len(), 4);
    assert_eq!(join(JoinKind::Right).len(), 4);
    assert_eq!(join(JoinKind::Full).len(), 6);

    let left = join(JoinKind::Left);
    assert!(left.rows.contains(&vec![
        Value::Int(3),
        Value::Str("z".into()),
        Value::Null,
        Value::Null
    ]));

    let filtered = engine
        .execute_select(
            &SelectPayload::table("a")
                .join(JoinKind::Full, "b", "id", "aid")
                .filter("b.id", Value::Int(12)),
        )
        .unwrap();
    assert_eq!(
        filtered.rows,
        vec![vec![Value::Null, Value::Null, Value::Int(12), Value::Int(4)]]
    );
}

#[test]
fn test_checkpoint_removes_old_segments() {
    let temp_dir = TempDir::new().unwrap();
    let config = EngineConfig::default().with_wal_segment_size(512);
    let engine = StorageEngine::with_config(temp_dir.path(), config.clone()).unwrap();
    engine.create_database("db").unwrap();
    engine.use_database("db").unwrap();
    engine.create_table(users_schema()).unwrap();
    for id in 0..30 {
        insert(&engine, "t", user(id, "row")).unwrap();
    }

    let logs = temp_dir.path().join("db/logs");
    let segments = || fs::read_dir(&logs).unwrap().count();
    assert!(segments() > 1);

    let checkpoint = engine.save_checkpoint().unwrap();
    assert_eq!(checkpoint.database, "db");
    assert_eq!(segments(), 1);
    crash(engine);

    let engine = StorageEngine::with_config(temp_dir.path(), config).unwrap();
    let stats = engine.use_database("db").unwrap();
    assert!(stats.start_lsn >= checkpoint.lsn);
    assert_eq!(engine.scan("t").unwrap().len(), 30);

    // LSNs keep growing past the removed segments
    let txn = engine.begin_transaction().unwrap();
    let next = engine.db().unwrap().txns.transaction(txn).unwrap().first_lsn;
    assert!(next.unwrap() > checkpoint.lsn);
}

#[test]
fn test_heap_page_summary() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    let rp = insert(&engine, "t", user(1, "a")).unwrap();
    insert(&engine, "t", user(2, "b")).unwrap();
    engine
        .auto_commit(|e, txn| e.delete_row(txn, "t", rp))
        .unwrap();

    assert_eq!(engine.heap_page_count("t").unwrap(), 1);
    let summary = engine.heap_page_summary("t", 0).unwrap();
    assert_eq!(summary.page_number, 0);
    assert_eq!(summary.slots.len(), 2);
    assert_eq!(summary.slots[0].1, 0);
    assert!(summary.lsn > 0);
    assert!(engine.heap_page_summary("t", 5).is_err());
}

#[test]
fn test_recovery_aborts_open_transactions() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    insert(&engine, "t", user(2, "two")).unwrap();

    let txn = engine.begin_transaction().unwrap();
    engine.insert_row(txn, "t", user(1, "one")).unwrap();

    // Recovery refuses to run underneath a live transaction
    let err = engine.db().unwrap().recover().unwrap_err();
    assert!(matches!(&err, EngineError::TransactionsActive(ids) if ids == &vec![txn]));
    assert_eq!(err.kind(), ErrorKind::State);

    let stats = engine.recover_from_wal().unwrap();
    assert_eq!(stats.losers, vec![txn]);
    assert!(find(&engine, "t", 1).is_empty());

    let err = engine.commit_transaction(txn).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(engine.db().unwrap().txns.active_ids().is_empty());

    crash(engine);
    let (engine, _) = reopen(&temp_dir);
    assert!(find(&engine, "t", 1).is_empty());
    assert_eq!(find(&engine, "t", 2), vec![user(2, "two")]);
}

#[test]
fn test_abort_undoes_past_a_failing_change() {
    let (temp_dir, engine) = setup_test_engine();
    for name in ["a", "b"] {
        engine
            .create_table(TableSchema::new(
                name,
                vec![ColumnDef::new("id", DataType::Int).primary_key()],
            ))
            .unwrap();
    }
    engine.save_checkpoint().unwrap();

    let txn = engine.begin_transaction().unwrap();
    engine.insert_row(txn, "a", vec![Value::Int(1)]).unwrap();
    engine.insert_row(txn, "b", vec![Value::Int(1)]).unwrap();
    // Undoing the insert into b, the newest change, now fails
    engine.db().unwrap().indexes.close_index("b").unwrap();

    let err = engine.abort_transaction(txn).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(engine.scan("a").unwrap().is_empty());
    assert!(matches!(
        engine.commit_transaction(txn),
        Err(EngineError::TxnError(TxnError::AlreadyAborted(_)))
    ));

    // The next recovery reverses what the abort left behind
    crash(engine);
    let (engine, stats) = reopen(&temp_dir);
    assert_eq!(stats.losers, vec![txn]);
    assert!(engine.scan("a").unwrap().is_empty());
    assert!(engine.scan("b").unwrap().is_empty());
}

#[test]
fn test_redo_skips_pages_already_written() {
    let (temp_dir, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();
    for id in 1..=4 {
        insert(&engine, "t", user(id, &format!("user{}", id))).unwrap();
    }
    let before = engine.heap_page_summary("t", 0).unwrap();
    crash(engine);

    // Keep the old checkpoint so the next run replays the same records again
    let checkpoint_path = temp_dir.path().join("db/checkpoint.json");
    let checkpoint = fs::read(&checkpoint_path).unwrap();

    let (engine, first) = reopen(&temp_dir);
    assert!(first.records > 0);
    assert_eq!(first.redone, 0);
    let rows = engine.scan("t").unwrap();
    assert_eq!(rows.len(), 4);
    crash(engine);

    fs::write(&checkpoint_path, &checkpoint).unwrap();
    let (engine, second) = reopen(&temp_dir);
    assert_eq!(second.start_lsn, first.start_lsn);
    assert!(second.records >= first.records);
    assert_eq!(second.redone, 0);
    assert_eq!(engine.scan("t").unwrap(), rows);

    let after = engine.heap_page_summary("t", 0).unwrap();
    assert_eq!(after.num_rows, before.num_rows);
    assert_eq!(after.record_end, before.record_end);
}

#[test]
fn test_checkpoint_forgets_finished_transactions() {
    let (_temp, engine) = setup_test_engine();
    engine.create_table(users_schema()).unwrap();

    let first = engine.begin_transaction().unwrap();
    engine.insert_row(first, "t", user(0, "zero")).unwrap();
    engine.commit_transaction(first).unwrap();
    for id in 1..=200 {
        insert(&engine, "t", user(id, "n")).unwrap();
    }
    let db = engine.db().unwrap();
    assert_eq!(db.txns.finished_count(), 201);

    engine.save_checkpoint().unwrap();
    assert_eq!(db.txns.finished_count(), 0);

    let err = engine.commit_transaction(first).unwrap_err();
    assert!(matches!(err, EngineError::TxnError(TxnError::Finished(id)) if id == first));
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(engine.scan("t").unwrap().len(), 201);
}
