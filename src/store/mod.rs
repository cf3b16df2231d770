// src/store/mod.rs

//! The intermediate store: an embedded SQLite file used as the staging area
//! between source extraction and final load.
//!
//! - [`database`] opens the store and batches writes into transactions.
//! - [`record`] describes a staged row and the SQL used to insert it.
//! - [`migrate`] applies schema files exactly once per store file.
//! - [`merge`] folds per-worker store files into one.

pub mod database;
pub mod merge;
pub mod migrate;
pub mod record;

pub use database::{IntermediateDb, MIGRATIONS_TABLE, StoreOptions};
pub use merge::ConflictPolicy;
pub use migrate::MigrationRecord;
pub use record::StagedRecord;
