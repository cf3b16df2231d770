// src/store/merge.rs

//! Merging other store files into this one.
//!
//! Parallel conversions write one store file per worker process; once the
//! workers are done the parent folds those files into the main store with
//! [`IntermediateDb::copy_from`].

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::Result;
use crate::store::database::{IntermediateDb, MIGRATIONS_TABLE};
use crate::store::record::quote_identifier;

/// How `copy_from` treats rows that collide with existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Fail the merge on a constraint violation.
    #[default]
    Abort,
    /// Overwrite the existing row (configuration-like tables).
    Replace,
    /// Keep the existing row (append-only tables such as uploads).
    Ignore,
}

impl ConflictPolicy {
    fn insert_verb(self) -> &'static str {
        match self {
            ConflictPolicy::Abort => "INSERT",
            ConflictPolicy::Replace => "INSERT OR REPLACE",
            ConflictPolicy::Ignore => "INSERT OR IGNORE",
        }
    }
}

const SOURCE_ALIAS: &str = "merge_source";

impl IntermediateDb {
    /// Names of the user tables of this store, excluding the migration ledger.
    pub fn table_names(&self) -> Result<Vec<String>> {
        table_names_in(self, "main")
    }

    /// Copy every table's rows from each store in `sources` into this one.
    ///
    /// Each source is attached, copied table by table inside one transaction
    /// using the table's [`ConflictPolicy`], and detached again. Tables the
    /// source does not have are skipped.
    pub fn copy_from<P: AsRef<Path>>(&mut self, sources: &[P]) -> Result<()> {
        self.flush()?;
        let tables = self.table_names()?;

        for source in sources {
            let source = source.as_ref();
            info!(source = ?source, target = ?self.path(), "merging store file");

            self.conn.execute(
                &format!("ATTACH DATABASE ?1 AS {SOURCE_ALIAS}"),
                [source.to_string_lossy().as_ref()],
            )?;

            let merged = self.copy_attached(&tables);
            let detached = self
                .conn
                .execute_batch(&format!("DETACH DATABASE {SOURCE_ALIAS}"));

            merged?;
            detached?;
        }

        Ok(())
    }

    fn copy_attached(&mut self, tables: &[String]) -> Result<()> {
        let available: HashSet<String> = table_names_in(self, SOURCE_ALIAS)?.into_iter().collect();

        let tx = self.conn.transaction()?;
        for table in tables {
            if !available.contains(table) {
                debug!(table = %table, "table missing in merge source; skipping");
                continue;
            }
            let policy = self.options.conflict_policy(table);
            let quoted = quote_identifier(table);
            let copied = tx.execute(
                &format!(
                    "{} INTO main.{quoted} SELECT * FROM {SOURCE_ALIAS}.{quoted}",
                    policy.insert_verb()
                ),
                [],
            )?;
            debug!(table = %table, rows = copied, ?policy, "copied table rows");
        }
        tx.commit()?;
        Ok(())
    }
}

fn table_names_in(db: &IntermediateDb, schema: &str) -> Result<Vec<String>> {
    let mut stmt = db.conn.prepare(&format!(
        "SELECT name FROM {schema}.sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name <> ?1 \
         ORDER BY name"
    ))?;
    let names = stmt
        .query_map([MIGRATIONS_TABLE], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}
