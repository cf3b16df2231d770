// src/convert/definition.rs

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::convert::ConvertOptions;
use crate::dag::{Scheduled, canonical_name};
use crate::errors::Result;
use crate::step::{Job, LogEntry, LogKind, ProgressStats, SerialJob, Step};
use crate::store::IntermediateDb;
use crate::worker::WorkerPool;

/// Free-form settings handed to every step factory (`[settings]` in
/// `Convoy.toml`).
pub type StepSettings = toml::Table;

type Factory<S> = Box<dyn Fn(&StepSettings) -> anyhow::Result<S> + Send + Sync>;

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub title: String,
    /// Sum of the per-item stats.
    pub totals: ProgressStats,
    /// Number of items processed.
    pub items: u64,
    /// Warning and error entries, in the order they were received.
    pub log: Vec<LogEntry>,
}

impl StepReport {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            totals: ProgressStats::zero(),
            items: 0,
            log: Vec::new(),
        }
    }

    /// Add the result of one item.
    pub fn record(&mut self, stats: ProgressStats, log: Vec<LogEntry>) {
        self.totals.merge(&stats);
        self.items += 1;
        self.log
            .extend(log.into_iter().filter(|entry| entry.kind != LogKind::Info));
    }

    pub fn has_errors(&self) -> bool {
        self.totals.error_count > 0
    }
}

/// What a step needs from the orchestrator while it executes.
pub struct ExecutionContext<'a> {
    pub options: &'a ConvertOptions,
    pub settings: &'a StepSettings,
    /// The main intermediate store, already migrated.
    pub store: &'a mut IntermediateDb,
}

/// A registered step with its concrete type erased.
pub trait RunnableStep: Scheduled + Send + Sync {
    fn title(&self, settings: &StepSettings) -> Result<String>;

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<StepReport>;
}

/// Registration record for a [`Step`] type.
///
/// The name and dependencies come from the type itself (canonical
/// snake_case), the instance from `factory`, which may run several times:
/// once per worker process in a parallel run.
pub struct StepDefinition<S: Step> {
    name: String,
    dependencies: Vec<String>,
    priority: Option<u32>,
    factory: Factory<S>,
    _step: PhantomData<fn() -> S>,
}

impl<S: Step> StepDefinition<S> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&StepSettings) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        Self {
            name: canonical_name(std::any::type_name::<S>()),
            dependencies: S::DEPENDENCIES.iter().map(|d| canonical_name(d)).collect(),
            priority: S::PRIORITY,
            factory: Box::new(factory),
            _step: PhantomData,
        }
    }

    /// Override the scheduling priority declared by the step type.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    fn build(&self, settings: &StepSettings) -> Result<S> {
        Ok((self.factory)(settings)?)
    }

    fn execute_serial(
        &self,
        step: S,
        ctx: &mut ExecutionContext<'_>,
        report: &mut StepReport,
    ) -> Result<()> {
        let items = step.items()?;
        ctx.store.flush()?;

        let mut job =
            SerialJob::new(step).with_store(ctx.store.path(), ctx.options.store.clone());
        let processed = (|| -> Result<()> {
            job.setup()?;
            for item in items {
                let stats = job.run(item)?;
                report.record(stats, job.drain_log());
            }
            Ok(())
        })();
        let cleaned = job.cleanup();
        processed.and(cleaned)
    }

    fn execute_parallel(
        &self,
        step: S,
        ctx: &mut ExecutionContext<'_>,
        report: &mut StepReport,
    ) -> Result<()> {
        let workers = ctx.options.workers;
        let paths: Vec<PathBuf> = (0..workers)
            .map(|index| worker_store_path(ctx.store.path(), index))
            .collect();

        for path in &paths {
            remove_store_files(path)?;
            let mut db = IntermediateDb::open(path, ctx.options.store.clone())?;
            if let Some(schema_dir) = &ctx.options.schema_dir {
                db.migrate(schema_dir)?;
            }
            db.close()?;
        }

        let items = step.items()?;
        drop(step);

        let mut pool = WorkerPool::new(workers, |index| {
            let step = self.build(ctx.settings)?;
            Ok(SerialJob::new(step).with_store(&paths[index], ctx.options.store.clone()))
        })?;
        pool.lifecycle_mut().before_fork(false, || {
            io::stdout().flush()?;
            io::stderr().flush()?;
            Ok(())
        });

        let delivered = pool.run(items, ctx.options.preserve_order, |output| {
            report.record(output.stats, output.log);
            Ok(())
        });
        drop(pool);
        let delivered = delivered?;
        debug!(step = %self.name, delivered, "parallel run finished");

        ctx.store.copy_from(&paths)?;
        for path in &paths {
            remove_store_files(path)?;
        }
        Ok(())
    }
}

impl<S: Step> Scheduled for StepDefinition<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn priority(&self) -> Option<u32> {
        self.priority
    }
}

impl<S: Step> RunnableStep for StepDefinition<S> {
    fn title(&self, settings: &StepSettings) -> Result<String> {
        Ok(self.build(settings)?.title())
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<StepReport> {
        let step = self.build(ctx.settings)?;
        let mut report = StepReport::new(&self.name, step.title());
        info!(
            step = %self.name,
            title = %report.title,
            max_progress = ?step.max_progress(),
            workers = ctx.options.workers,
            "starting step"
        );

        if ctx.options.workers <= 1 {
            self.execute_serial(step, ctx, &mut report)?;
        } else {
            self.execute_parallel(step, ctx, &mut report)?;
        }

        info!(
            step = %self.name,
            items = report.items,
            warnings = report.totals.warning_count,
            errors = report.totals.error_count,
            "step finished"
        );
        Ok(report)
    }
}

/// `<db>.worker-<index>` next to the main store file.
pub fn worker_store_path(db: &Path, index: usize) -> PathBuf {
    let mut name = db.as_os_str().to_os_string();
    name.push(format!(".worker-{index}"));
    PathBuf::from(name)
}

/// Delete a store file together with its `-wal` / `-shm` companions.
fn remove_store_files(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        match fs::remove_file(&name) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
