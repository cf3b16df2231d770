// src/lib.rs

pub mod cli;
pub mod config;
pub mod convert;
pub mod dag;
pub mod errors;
pub mod id;
pub mod lifecycle;
pub mod logging;
pub mod step;
pub mod store;
pub mod worker;

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, MigrateArgs, PlanArgs};
use crate::config::{ConfigFile, load_and_validate, validate_config};
use crate::dag::{Scheduled, canonical_name, filter, sort_with_satisfied};
use crate::store::IntermediateDb;

/// High-level entry point used by `main.rs`.
pub fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Plan(plan) => run_plan(plan),
        Command::Migrate(migrate) => run_migrate(migrate),
    }
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let mut cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if !args.skip.is_empty() || !args.only.is_empty() {
        cfg.pipeline.skip.extend(args.skip);
        if !args.only.is_empty() {
            cfg.pipeline.only = args.only;
        }
        validate_config(&cfg)?;
    }

    let order = plan_order(&cfg)?;
    print_plan(&mut io::stdout().lock(), &cfg, &order)?;
    debug!("plan complete (no execution)");
    Ok(())
}

fn run_migrate(args: MigrateArgs) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => Some(
            load_and_validate(path).with_context(|| format!("loading {}", path.display()))?,
        ),
        None => None,
    };

    let database: PathBuf = match (&args.database, &cfg) {
        (Some(db), _) => db.clone(),
        (None, Some(cfg)) => cfg.pipeline.database.clone(),
        (None, None) => bail!("no store given; pass --database or --config"),
    };
    let configured_schema = cfg.as_ref().and_then(|c| c.pipeline.schema_dir.as_ref());
    let schema_dir: PathBuf = match (&args.schema, configured_schema) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) => dir.clone(),
        (None, None) => {
            bail!("no schema directory given; pass --schema or set [pipeline].schema_dir")
        }
    };
    let options = cfg.as_ref().map(ConfigFile::store_options).unwrap_or_default();

    let mut db = IntermediateDb::open(&database, options)?;
    let applied = db.migrate(&schema_dir)?;
    db.close()?;

    info!(database = ?database, applied = applied.len(), "migration finished");
    let mut out = io::stdout().lock();
    if applied.is_empty() {
        writeln!(out, "{}: schema is up to date", database.display())?;
    }
    for path in applied {
        writeln!(out, "applied {path}")?;
    }
    Ok(())
}

/// Execution order of the declared steps after `skip` / `only`.
pub fn plan_order(cfg: &ConfigFile) -> Result<Vec<String>> {
    let descriptors = cfg.descriptors();
    let selected = filter(&descriptors, &cfg.pipeline.skip, &cfg.pipeline.only)?;
    let satisfied: HashSet<String> =
        cfg.pipeline.skip.iter().map(|s| canonical_name(s)).collect();
    let ordered = sort_with_satisfied(&selected, &satisfied)?;
    Ok(ordered.iter().map(|d| d.name().to_string()).collect())
}

/// Plan output: pipeline settings, then one line per step in run order.
pub fn print_plan(out: &mut impl Write, cfg: &ConfigFile, order: &[String]) -> io::Result<()> {
    let p = &cfg.pipeline;
    writeln!(out, "convoy plan")?;
    writeln!(out, "  pipeline.workers = {}", p.workers)?;
    writeln!(out, "  pipeline.batch_size = {}", p.batch_size)?;
    writeln!(out, "  pipeline.database = {}", p.database.display())?;
    if let Some(ref dir) = p.schema_dir {
        writeln!(out, "  pipeline.schema_dir = {}", dir.display())?;
    }
    if !p.skip.is_empty() {
        writeln!(out, "  pipeline.skip = {:?}", p.skip)?;
    }
    if !p.only.is_empty() {
        writeln!(out, "  pipeline.only = {:?}", p.only)?;
    }
    writeln!(out)?;

    let descriptors = cfg.descriptors();
    writeln!(out, "steps ({} of {}):", order.len(), descriptors.len())?;
    for (position, name) in order.iter().enumerate() {
        writeln!(out, "  {}. {name}", position + 1)?;
        let Some(step) = descriptors.iter().find(|d| &d.name == name) else {
            continue;
        };
        if !step.dependencies.is_empty() {
            writeln!(out, "      after: {:?}", step.dependencies)?;
        }
        if let Some(priority) = step.priority {
            writeln!(out, "      priority: {priority}")?;
        }
    }
    Ok(())
}
