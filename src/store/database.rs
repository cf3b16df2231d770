// src/store/database.rs

//! The intermediate database connection.
//!
//! Writes are grouped into transactions of `batch_size` statements: the
//! first insert after a commit opens a transaction, and every `batch_size`-th
//! insert commits it. Nothing written through [`IntermediateDb::insert`] is
//! visible to other connections before that commit or an explicit
//! [`IntermediateDb::flush`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Params, params_from_iter};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::store::merge::ConflictPolicy;
use crate::store::record::StagedRecord;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 5;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CACHE_SIZE_KIB: u32 = 40 * 1024;

/// Name of the table recording applied schema files.
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Connection settings for an intermediate store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Statements per transaction before an automatic commit.
    pub batch_size: usize,
    /// Capacity of the LRU prepared-statement cache.
    pub statement_cache_size: usize,
    pub busy_timeout: Duration,
    /// Page cache size in KiB.
    pub cache_size_kib: u32,
    /// Per-table conflict handling used by `copy_from`.
    pub conflict_policies: BTreeMap<String, ConflictPolicy>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            conflict_policies: BTreeMap::new(),
        }
    }
}

impl StoreOptions {
    pub fn conflict_policy(&self, table: &str) -> ConflictPolicy {
        self.conflict_policies
            .get(table)
            .copied()
            .unwrap_or_default()
    }
}

/// Single-file SQLite store used as the staging area of a conversion.
#[derive(Debug)]
pub struct IntermediateDb {
    pub(crate) conn: Connection,
    path: PathBuf,
    pub(crate) options: StoreOptions,
    pending_statements: usize,
    in_transaction: bool,
    committed: u64,
}

impl IntermediateDb {
    /// Open (or create) the store at `path` with write-throughput settings:
    /// WAL journal, `synchronous = OFF`, in-memory temp storage, a bounded
    /// page cache and a busy timeout.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(options.busy_timeout)?;
        conn.set_prepared_statement_cache_capacity(options.statement_cache_size);

        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "cache_size", -i64::from(options.cache_size_kib))?;
        conn.pragma_update(None, "foreign_keys", "OFF")?;

        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(path = ?path, journal_mode = %journal_mode, "store is not using WAL journal mode");
        }
        debug!(path = ?path, batch_size = options.batch_size, "opened intermediate store");

        Ok(Self {
            conn,
            path,
            options,
            pending_statements: 0,
            in_transaction: false,
            committed: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Read access to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of batch transactions committed so far.
    pub fn committed_transactions(&self) -> u64 {
        self.committed
    }

    /// Whether a batch transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Execute one write statement inside the current batch transaction.
    pub fn insert<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN DEFERRED TRANSACTION")?;
            self.in_transaction = true;
        }

        let changed = {
            let mut stmt = self.conn.prepare_cached(sql)?;
            stmt.execute(params)?
        };

        self.pending_statements += 1;
        if self.pending_statements >= self.options.batch_size.max(1) {
            self.commit()?;
        }

        Ok(changed)
    }

    pub fn insert_record(&mut self, record: &StagedRecord) -> Result<usize> {
        let sql = record.insert_sql();
        self.insert(&sql, params_from_iter(record.columns.values()))
    }

    /// Run statements (DDL, maintenance) outside of write batching. Any open
    /// batch is committed first.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.flush()?;
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Commit the open batch transaction, if any.
    pub fn flush(&mut self) -> Result<()> {
        if self.in_transaction {
            self.commit()?;
        }
        Ok(())
    }

    /// Flush pending writes and close the store.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.conn.execute_batch("PRAGMA optimize")?;
        info!(
            path = ?self.path,
            transactions = self.committed,
            "closed intermediate store"
        );
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        debug!(
            path = ?self.path,
            statements = self.pending_statements,
            "committed batch transaction"
        );
        self.in_transaction = false;
        self.pending_statements = 0;
        self.committed += 1;
        Ok(())
    }
}

impl Drop for IntermediateDb {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(err) = self.commit() {
                warn!(path = ?self.path, error = %err, "failed to commit pending writes on drop");
            }
        }
    }
}
