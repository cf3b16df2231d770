use std::fs;
use std::path::{Path, PathBuf};

use convoy::errors::ConvoyError;
use convoy::id;
use convoy::store::record::quote_identifier;
use convoy::store::{ConflictPolicy, IntermediateDb, StagedRecord, StoreOptions};
use convoy_test_utils::steps::{SAMPLE_SCHEMA, write_sample_schema};
use rusqlite::params;

mod common;

use common::{Workspace, count_rows};

fn migrated(path: &Path, schema: &Path, options: StoreOptions) -> IntermediateDb {
    let mut db = IntermediateDb::open(path, options).unwrap();
    db.migrate(schema).unwrap();
    db
}

fn user(id: i64, name: &str) -> StagedRecord {
    StagedRecord::new("users")
        .with("id", id)
        .with("name", name.to_string())
}

fn user_name(db: &IntermediateDb, id: i64) -> String {
    db.connection()
        .query_row("SELECT name FROM users WHERE id = ?1", [id], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_writes_commit_every_batch_size_statements() {
    common::init_tracing();
    let ws = Workspace::new();
    let mut db = migrated(&ws.database, &ws.schema, StoreOptions::default());

    for id in 1..=1500i64 {
        db.insert(
            "INSERT INTO users (id, name) VALUES (?1, ?2)",
            params![id, format!("user-{id}")],
        )
        .unwrap();
    }

    // One full batch is committed; the tail is still pending.
    assert_eq!(db.committed_transactions(), 1);
    assert!(db.in_transaction());
    assert_eq!(count_rows(&ws.database, "users"), 1000);

    db.flush().unwrap();
    assert_eq!(db.committed_transactions(), 2);
    assert!(!db.in_transaction());
    assert_eq!(count_rows(&ws.database, "users"), 1500);

    // Flushing with nothing pending is a no-op.
    db.flush().unwrap();
    assert_eq!(db.committed_transactions(), 2);
}

#[test]
fn test_close_and_drop_commit_pending_writes() {
    let ws = Workspace::new();

    let mut db = migrated(&ws.database, &ws.schema, StoreOptions::default());
    db.insert_record(&user(1, "closed")).unwrap();
    db.close().unwrap();
    assert_eq!(count_rows(&ws.database, "users"), 1);

    let mut db = IntermediateDb::open(&ws.database, StoreOptions::default()).unwrap();
    db.insert_record(&user(2, "dropped")).unwrap();
    drop(db);
    assert_eq!(count_rows(&ws.database, "users"), 2);
}

#[test]
fn test_small_batches_commit_eagerly() {
    let ws = Workspace::new();
    let options = StoreOptions {
        batch_size: 2,
        ..StoreOptions::default()
    };
    let mut db = migrated(&ws.database, &ws.schema, options);

    for id in 1..=5 {
        db.insert_record(&user(id, "u")).unwrap();
    }
    assert_eq!(db.committed_transactions(), 2);
    assert_eq!(count_rows(&ws.database, "users"), 4);
}

#[test]
fn test_execute_batch_commits_pending_writes_first() {
    let ws = Workspace::new();
    let mut db = migrated(&ws.database, &ws.schema, StoreOptions::default());

    db.insert_record(&user(1, "a")).unwrap();
    db.execute_batch("CREATE INDEX users_by_name ON users (name)")
        .unwrap();

    assert!(!db.in_transaction());
    assert_eq!(count_rows(&ws.database, "users"), 1);
}

#[test]
fn test_open_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("store.sqlite3");

    let db = IntermediateDb::open(&path, StoreOptions::default()).unwrap();
    assert_eq!(db.path(), path.as_path());
    db.close().unwrap();
    assert!(path.exists());
}

#[test]
fn test_migrate_applies_each_file_once() {
    let ws = Workspace::new();
    let mut db = IntermediateDb::open(&ws.database, StoreOptions::default()).unwrap();
    assert!(db.applied_migrations().unwrap().is_empty());

    let applied = db.migrate(&ws.schema).unwrap();
    assert_eq!(
        applied,
        vec![
            "001_users.sql",
            "002_categories.sql",
            "topics/001_topic_users.sql"
        ]
    );
    assert!(db.migrate(&ws.schema).unwrap().is_empty());

    let ledger = db.applied_migrations().unwrap();
    assert_eq!(ledger.len(), SAMPLE_SCHEMA.len());
    for (record, (path, sql)) in ledger.iter().zip(SAMPLE_SCHEMA) {
        assert_eq!(record.path, *path);
        assert_eq!(record.sql_hash, id::hash(sql));
        assert!(!record.applied_at.is_empty());
    }

    // The ledger is not a user table.
    assert_eq!(
        db.table_names().unwrap(),
        vec!["categories", "topic_users", "users"]
    );
}

#[test]
fn test_migrate_picks_up_new_files_only() {
    let ws = Workspace::new();
    let mut db = migrated(&ws.database, &ws.schema, StoreOptions::default());

    fs::write(
        ws.schema.join("003_badges.sql"),
        "CREATE TABLE badges (id INTEGER PRIMARY KEY);",
    )
    .unwrap();
    fs::write(ws.schema.join("README.md"), "not a migration").unwrap();

    assert_eq!(db.migrate(&ws.schema).unwrap(), vec!["003_badges.sql"]);
}

#[test]
fn test_failed_migration_names_the_file_and_is_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("schema");
    fs::create_dir_all(&schema).unwrap();
    fs::write(schema.join("001_ok.sql"), "CREATE TABLE ok (id INTEGER);").unwrap();
    fs::write(schema.join("002_bad.sql"), "CREATE TABLE (;").unwrap();

    let mut db = IntermediateDb::open(dir.path().join("db.sqlite3"), StoreOptions::default())
        .unwrap();
    match db.migrate(&schema) {
        Err(ConvoyError::Migration { path, .. }) => assert_eq!(path, "002_bad.sql"),
        other => panic!("expected a migration error, got {other:?}"),
    }

    let ledger: Vec<String> = db
        .applied_migrations()
        .unwrap()
        .into_iter()
        .map(|m| m.path)
        .collect();
    assert_eq!(ledger, vec!["001_ok.sql"]);
}

#[test]
fn test_copy_from_merges_worker_stores() {
    let ws = Workspace::new();
    let worker_paths: Vec<_> = (0..2)
        .map(|i| ws.path().join(format!("worker-{i}.sqlite3")))
        .collect();

    for (i, path) in worker_paths.iter().enumerate() {
        let mut db = migrated(path, &ws.schema, StoreOptions::default());
        for id in 0..3 {
            db.insert_record(&user(i as i64 * 10 + id, "w")).unwrap();
        }
        db.close().unwrap();
    }

    let mut main = migrated(&ws.database, &ws.schema, StoreOptions::default());
    main.copy_from(&worker_paths).unwrap();
    main.close().unwrap();

    assert_eq!(count_rows(&ws.database, "users"), 6);
    assert_eq!(count_rows(&ws.database, "categories"), 0);
}

#[test]
fn test_copy_from_skips_tables_missing_in_source() {
    let ws = Workspace::new();
    let partial_schema = ws.path().join("partial");
    fs::create_dir_all(&partial_schema).unwrap();
    let (path, sql) = SAMPLE_SCHEMA[0];
    fs::write(partial_schema.join(path), sql).unwrap();

    let source = ws.path().join("partial.sqlite3");
    let mut db = migrated(&source, &partial_schema, StoreOptions::default());
    db.insert_record(&user(1, "only users")).unwrap();
    db.close().unwrap();

    let mut main = migrated(&ws.database, &ws.schema, StoreOptions::default());
    main.copy_from(&[&source]).unwrap();
    assert_eq!(user_name(&main, 1), "only users");
}

/// A main store holding user 1 ("old") and a source holding users 1 ("new")
/// and 2 ("fresh").
fn conflicting_stores(
    ws: &Workspace,
    policy: Option<ConflictPolicy>,
) -> (IntermediateDb, PathBuf) {
    let source = ws.path().join("source.sqlite3");
    let mut db = migrated(&source, &ws.schema, StoreOptions::default());
    db.insert_record(&user(1, "new")).unwrap();
    db.insert_record(&user(2, "fresh")).unwrap();
    db.close().unwrap();

    let mut options = StoreOptions::default();
    if let Some(policy) = policy {
        options.conflict_policies.insert("users".to_string(), policy);
    }
    let mut main = migrated(&ws.database, &ws.schema, options);
    main.insert_record(&user(1, "old")).unwrap();
    main.flush().unwrap();
    (main, source)
}

#[test]
fn test_conflicts_abort_by_default() {
    let ws = Workspace::new();
    let (mut main, source) = conflicting_stores(&ws, None);

    assert!(matches!(
        main.copy_from(&[&source]),
        Err(ConvoyError::Store(_))
    ));
    // The failed merge leaves the target untouched and the source detached.
    assert_eq!(user_name(&main, 1), "old");
    assert_eq!(count_rows(&ws.database, "users"), 1);
    assert_eq!(main.table_names().unwrap().len(), 3);
}

#[test]
fn test_replace_policy_overwrites_existing_rows() {
    let ws = Workspace::new();
    let (mut main, source) = conflicting_stores(&ws, Some(ConflictPolicy::Replace));

    main.copy_from(&[&source]).unwrap();
    assert_eq!(user_name(&main, 1), "new");
    assert_eq!(user_name(&main, 2), "fresh");
}

#[test]
fn test_ignore_policy_keeps_existing_rows() {
    let ws = Workspace::new();
    let (mut main, source) = conflicting_stores(&ws, Some(ConflictPolicy::Ignore));

    main.copy_from(&[&source]).unwrap();
    assert_eq!(user_name(&main, 1), "old");
    assert_eq!(user_name(&main, 2), "fresh");
}

#[test]
fn test_staged_record_sql_is_stable_per_column_set() {
    let a = StagedRecord::new("users")
        .with("name", "a".to_string())
        .with("id", 1i64);
    let b = StagedRecord::new("users")
        .with("id", 2i64)
        .with("name", "b".to_string());

    assert_eq!(
        a.insert_sql(),
        r#"INSERT INTO "users" ("id", "name") VALUES (?1, ?2)"#
    );
    assert_eq!(a.insert_sql(), b.insert_sql());
    assert_eq!(
        StagedRecord::new("log").insert_sql(),
        r#"INSERT INTO "log" DEFAULT VALUES"#
    );
    assert_eq!(quote_identifier(r#"odd"name"#), r#""odd""name""#);
}

#[test]
fn test_schema_helper_writes_nested_files() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_schema(dir.path()).unwrap();
    assert!(dir.path().join("topics").join("001_topic_users.sql").is_file());
}
