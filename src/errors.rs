// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvoyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unknown step names {missing:?}; known steps are {known:?}")]
    UnknownSteps {
        missing: Vec<String>,
        known: Vec<String>,
    },

    #[error("Step '{step}' depends on '{dependency}', which is not part of this run")]
    MissingDependency { step: String, dependency: String },

    #[error("Circular dependency detected between steps: {0:?}")]
    CircularDependency(Vec<String>),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Migration '{path}' failed: {source}")]
    Migration {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Lifecycle hook failed: {0:#}")]
    Lifecycle(anyhow::Error),

    #[error("OS error: {0}")]
    Os(#[from] nix::Error),

    #[error("Worker {index} exited abnormally: {status}")]
    WorkerFailed { index: usize, status: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ConvoyError>;
