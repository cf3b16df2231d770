// src/step/job.rs

//! Jobs run a step against one item at a time.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use anyhow::anyhow;
use tracing::debug;

use crate::dag::canonical_name;
use crate::errors::{ConvoyError, Result};
use crate::step::{LogEntry, ProgressStats, Step, Tracker};
use crate::store::{IntermediateDb, StagedRecord, StoreOptions};

/// Message logged for an item whose processing failed.
pub const ITEM_FAILED_MESSAGE: &str = "Failed to process item";

/// Something that can process items one by one.
///
/// `run` returns the stats of exactly one item; aggregation is the caller's
/// job. An `Err` from `run` is fatal for the whole job (e.g. the store
/// rejected a write), whereas item-level failures are reported through the
/// returned stats.
pub trait Job {
    type Item;

    /// Prepare resources in the process that will run items.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, item: Self::Item) -> Result<ProgressStats>;

    /// Tear down. Called exactly once when no more items will arrive.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Log entries recorded since the last call.
    fn drain_log(&mut self) -> Vec<LogEntry> {
        Vec::new()
    }
}

enum Sink {
    None,
    Deferred(PathBuf, StoreOptions),
    Open(IntermediateDb),
}

/// Runs a [`Step`] in the current process, writing its staged records to an
/// optional intermediate store.
pub struct SerialJob<S: Step> {
    step: S,
    tracker: Tracker,
    sink: Sink,
    set_up: bool,
    cleaned_up: bool,
}

impl<S: Step> SerialJob<S> {
    pub fn new(step: S) -> Self {
        let name = canonical_name(std::any::type_name::<S>());
        Self {
            step,
            tracker: Tracker::new(name),
            sink: Sink::None,
            set_up: false,
            cleaned_up: false,
        }
    }

    /// Write staged records into the store at `path`. The store is opened
    /// lazily in [`Job::setup`], i.e. inside the worker process.
    pub fn with_store(mut self, path: impl Into<PathBuf>, options: StoreOptions) -> Self {
        self.sink = Sink::Deferred(path.into(), options);
        self
    }

    /// Write staged records into an already open store.
    pub fn with_db(mut self, db: IntermediateDb) -> Self {
        self.sink = Sink::Open(db);
        self
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    fn write_records(&mut self, records: &[StagedRecord]) -> Result<()> {
        match &mut self.sink {
            Sink::Open(db) => {
                for record in records {
                    db.insert_record(record)?;
                }
                Ok(())
            }
            Sink::None => Ok(()),
            Sink::Deferred(path, _) => Err(ConvoyError::Other(anyhow!(
                "store {path:?} was not opened before writing"
            ))),
        }
    }
}

impl<S: Step> Job for SerialJob<S> {
    type Item = S::Item;

    fn setup(&mut self) -> Result<()> {
        if self.set_up {
            return Ok(());
        }
        self.set_up = true;

        if let Sink::Deferred(path, options) = &self.sink {
            let db = IntermediateDb::open(path, options.clone())?;
            self.sink = Sink::Open(db);
        }
        self.step.setup()?;
        Ok(())
    }

    fn run(&mut self, item: S::Item) -> Result<ProgressStats> {
        self.setup()?;
        self.tracker.reset_stats();

        let details = serde_json::to_value(&item).ok();
        let step = &mut self.step;
        let tracker = &mut self.tracker;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| step.process_item(item, tracker)));

        match outcome {
            Ok(Ok(records)) => self.write_records(&records)?,
            Ok(Err(err)) => {
                self.tracker
                    .log_error(ITEM_FAILED_MESSAGE, Some(&err), details);
            }
            Err(payload) => {
                let err = anyhow!("panicked: {}", panic_message(payload.as_ref()));
                self.tracker
                    .log_error(ITEM_FAILED_MESSAGE, Some(&err), details);
            }
        }

        Ok(*self.tracker.stats())
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        debug!(step = %self.tracker.step(), "cleaning up job");

        let step_result = self.step.cleanup();
        if let Sink::Open(db) = std::mem::replace(&mut self.sink, Sink::None) {
            db.close()?;
        }
        step_result?;
        Ok(())
    }

    fn drain_log(&mut self) -> Vec<LogEntry> {
        self.tracker.drain_log()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
