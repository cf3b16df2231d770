// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::convert::{DEFAULT_DATABASE, StepSettings};
use crate::dag::{StepDescriptor, canonical_name};
use crate::store::database::{
    DEFAULT_BATCH_SIZE, DEFAULT_BUSY_TIMEOUT, DEFAULT_CACHE_SIZE_KIB,
    DEFAULT_STATEMENT_CACHE_SIZE,
};
use crate::store::{ConflictPolicy, StoreOptions};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// workers = 4
/// database = "staging.sqlite3"
/// schema_dir = "schema"
/// skip = ["uploads"]
///
/// [pipeline.conflict_policies]
/// site_settings = "replace"
///
/// [step.users]
///
/// [step.topic_users]
/// after = ["users"]
/// priority = 1
///
/// [settings]
/// source_url = "postgres://localhost/forum"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Declared steps from `[step.<name>]`, used for planning.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,

    /// Passed verbatim to every step factory.
    #[serde(default)]
    pub settings: StepSettings,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)` or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub step: BTreeMap<String, StepConfig>,
    pub settings: StepSettings,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSection,
        step: BTreeMap<String, StepConfig>,
        settings: StepSettings,
    ) -> Self {
        Self {
            pipeline,
            step,
            settings,
        }
    }

    /// Store connection settings derived from `[pipeline]`.
    pub fn store_options(&self) -> StoreOptions {
        let p = &self.pipeline;
        StoreOptions {
            batch_size: p.batch_size,
            statement_cache_size: p.statement_cache_size,
            busy_timeout: Duration::from_millis(p.busy_timeout_ms),
            cache_size_kib: p.cache_size_kib,
            conflict_policies: p.conflict_policies.clone(),
        }
    }

    /// The declared steps as schedulable descriptors, with canonical names.
    pub fn descriptors(&self) -> Vec<StepDescriptor> {
        self.step
            .iter()
            .map(|(name, step)| step.descriptor(name))
            .collect()
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Worker processes per step. `1` runs in-process.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_statement_cache_size")]
    pub statement_cache_size: usize,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,

    /// Intermediate store file. Relative paths are resolved against the
    /// directory of the config file.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Directory with `.sql` schema migrations.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,

    #[serde(default)]
    pub skip: Vec<String>,

    #[serde(default)]
    pub only: Vec<String>,

    #[serde(default)]
    pub preserve_order: bool,

    /// Per-table conflict handling when merging worker stores.
    #[serde(default)]
    pub conflict_policies: BTreeMap<String, ConflictPolicy>,
}

fn default_workers() -> usize {
    1
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_statement_cache_size() -> usize {
    DEFAULT_STATEMENT_CACHE_SIZE
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

fn default_cache_size_kib() -> u32 {
    DEFAULT_CACHE_SIZE_KIB
}

fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE)
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            statement_cache_size: default_statement_cache_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size_kib: default_cache_size_kib(),
            database: default_database(),
            schema_dir: None,
            skip: Vec::new(),
            only: Vec::new(),
            preserve_order: false,
            conflict_policies: BTreeMap::new(),
        }
    }
}

/// `[step.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    /// Steps that must run before this one (`after = ["users"]`).
    #[serde(default)]
    pub after: Vec<String>,

    /// Lower runs first among ready steps.
    #[serde(default)]
    pub priority: Option<u32>,
}

impl StepConfig {
    pub fn descriptor(&self, name: &str) -> StepDescriptor {
        StepDescriptor {
            name: canonical_name(name),
            dependencies: self.after.iter().map(|d| canonical_name(d)).collect(),
            priority: self.priority,
        }
    }
}
