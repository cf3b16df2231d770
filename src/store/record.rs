// src/store/record.rs

use std::collections::BTreeMap;

use rusqlite::types::Value;

/// One row to be written into the intermediate store.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub table: String,
    pub columns: BTreeMap<String, Value>,
}

impl StagedRecord {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// `INSERT` statement for this record's table and column set.
    ///
    /// Records with the same table and columns produce identical SQL, which
    /// keeps them on the same cached prepared statement.
    pub fn insert_sql(&self) -> String {
        if self.columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(&self.table));
        }
        let columns: Vec<String> = self.columns.keys().map(|c| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(&self.table),
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
