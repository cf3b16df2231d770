// src/store/migrate.rs

//! Idempotent schema migrations.
//!
//! Every `.sql` file below a schema directory is applied at most once per
//! store file. Applied files are recorded in the `schema_migrations` ledger
//! by their path relative to the schema directory, together with a hash of
//! their contents, so `migrate` can run on every process start.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::params;
use tracing::{debug, info};

use crate::errors::{ConvoyError, Result};
use crate::id;
use crate::store::database::{IntermediateDb, MIGRATIONS_TABLE};

/// One row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub path: String,
    pub applied_at: String,
    pub sql_hash: String,
}

impl IntermediateDb {
    /// Apply all not-yet-applied `.sql` files below `schema_dir` in sorted
    /// relative-path order. Returns the paths applied by this call.
    pub fn migrate(&mut self, schema_dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let schema_dir = schema_dir.as_ref();
        self.flush()?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                path TEXT NOT NULL PRIMARY KEY,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                sql_hash TEXT NOT NULL
            )"
        ))?;

        let applied: HashSet<String> = self
            .applied_migrations()?
            .into_iter()
            .map(|m| m.path)
            .collect();

        let mut files = Vec::new();
        collect_sql_files(schema_dir, schema_dir, &mut files)?;
        files.sort();

        let mut newly_applied = Vec::new();
        for (relative, absolute) in files {
            if applied.contains(&relative) {
                debug!(path = %relative, "migration already applied");
                continue;
            }

            let sql = fs::read_to_string(&absolute)?;
            let tx = self.conn.transaction()?;
            tx.execute_batch(&sql).map_err(|source| ConvoyError::Migration {
                path: relative.clone(),
                source,
            })?;
            tx.execute(
                &format!("INSERT INTO {MIGRATIONS_TABLE} (path, sql_hash) VALUES (?1, ?2)"),
                params![relative, id::hash(&sql)],
            )?;
            tx.commit()?;

            info!(path = %relative, store = ?self.path(), "applied migration");
            newly_applied.push(relative);
        }

        Ok(newly_applied)
    }

    /// Ledger rows, ordered by path. Empty if the ledger does not exist yet.
    pub fn applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [MIGRATIONS_TABLE],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT path, created_at, sql_hash FROM {MIGRATIONS_TABLE} ORDER BY path"
        ))?;
        let records = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    path: row.get(0)?,
                    applied_at: row.get(1)?,
                    sql_hash: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Recursively collect `(relative path, absolute path)` for `.sql` files.
fn collect_sql_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sql_files(root, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "sql") {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(path.as_path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((relative, path));
        }
    }
    Ok(())
}
