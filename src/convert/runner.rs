// src/convert/runner.rs

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::convert::{ExecutionContext, RunnableStep, StepDefinition, StepReport, StepSettings};
use crate::dag::{Scheduled, canonical_name, filter, sort_with_satisfied};
use crate::errors::Result;
use crate::step::Step;
use crate::store::{IntermediateDb, StoreOptions};

/// Default intermediate store file, relative to the working directory.
pub const DEFAULT_DATABASE: &str = "convoy.sqlite3";

/// Run-wide settings of a [`Converter`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Worker processes per step; `1` runs items in the current process.
    pub workers: usize,
    pub database: PathBuf,
    /// Directory of `.sql` migrations applied to every store file.
    pub schema_dir: Option<PathBuf>,
    pub store: StoreOptions,
    pub skip: Vec<String>,
    pub only: Vec<String>,
    /// Report items in input order even when several workers run them.
    pub preserve_order: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            database: PathBuf::from(DEFAULT_DATABASE),
            schema_dir: None,
            store: StoreOptions::default(),
            skip: Vec::new(),
            only: Vec::new(),
            preserve_order: false,
        }
    }
}

impl ConvertOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let pipeline = &cfg.pipeline;
        Self {
            workers: pipeline.workers,
            database: pipeline.database.clone(),
            schema_dir: pipeline.schema_dir.clone(),
            store: cfg.store_options(),
            skip: pipeline.skip.clone(),
            only: pipeline.only.clone(),
            preserve_order: pipeline.preserve_order,
        }
    }
}

/// Runs registered steps in dependency order against one intermediate store.
pub struct Converter {
    options: ConvertOptions,
    settings: StepSettings,
    steps: Vec<Box<dyn RunnableStep>>,
}

impl Converter {
    pub fn new(options: ConvertOptions, settings: StepSettings) -> Self {
        Self {
            options,
            settings,
            steps: Vec::new(),
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(ConvertOptions::from_config(cfg), cfg.settings.clone())
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn register<S: Step>(&mut self, definition: StepDefinition<S>) -> &mut Self {
        self.steps.push(Box::new(definition));
        self
    }

    /// Names of all registered steps, in registration order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// The names of the steps `run` would execute, in execution order.
    pub fn plan(&self) -> Result<Vec<String>> {
        Ok(self
            .planned()?
            .into_iter()
            .map(|step| step.name().to_string())
            .collect())
    }

    /// Migrate the main store, then execute every planned step.
    ///
    /// Scheduling errors surface before the store is touched. Items that
    /// fail are recorded in the reports; any other error aborts the run.
    pub fn run(&self) -> Result<Vec<StepReport>> {
        let planned = self.planned()?;
        info!(
            steps = ?planned.iter().map(|s| s.name()).collect::<Vec<_>>(),
            database = ?self.options.database,
            "starting conversion"
        );

        let mut store = IntermediateDb::open(&self.options.database, self.options.store.clone())?;
        if let Some(schema_dir) = &self.options.schema_dir {
            store.migrate(schema_dir)?;
        }

        let mut reports = Vec::with_capacity(planned.len());
        for step in planned {
            let mut ctx = ExecutionContext {
                options: &self.options,
                settings: &self.settings,
                store: &mut store,
            };
            let report = step.execute(&mut ctx)?;
            if report.has_errors() {
                warn!(
                    step = %report.name,
                    errors = report.totals.error_count,
                    "step finished with failed items"
                );
            }
            reports.push(report);
        }

        store.close()?;
        Ok(reports)
    }

    fn planned(&self) -> Result<Vec<&dyn RunnableStep>> {
        let selected = filter(&self.steps, &self.options.skip, &self.options.only)?;
        let satisfied: HashSet<String> = self
            .options
            .skip
            .iter()
            .map(|name| canonical_name(name))
            .collect();
        let ordered = sort_with_satisfied(&selected, &satisfied)?;
        Ok(ordered.into_iter().copied().map(|step| &**step).collect())
    }
}
