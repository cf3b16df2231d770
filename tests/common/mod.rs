#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tempfile::TempDir;

pub use convoy_test_utils::init_tracing;
use convoy_test_utils::steps::write_sample_schema;

static FORK_LOCK: Mutex<()> = Mutex::new(());

/// Serialise tests that fork.
///
/// A child only inherits the forking thread; a lock held by any other test
/// thread at that moment (stdio, SQLite globals) would stay locked forever
/// in the child.
pub fn fork_guard() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A temp directory holding the sample schema and a store path.
pub struct Workspace {
    pub dir: TempDir,
    pub schema: PathBuf,
    pub database: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema");
        write_sample_schema(&schema).unwrap();
        let database = dir.path().join("staging.sqlite3");
        Self {
            dir,
            schema,
            database,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Row count of `table`, read through a fresh connection.
pub fn count_rows(db: &Path, table: &str) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
        .unwrap()
}

/// Files in `dir` whose name starts with `prefix`.
pub fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort();
    names
}
