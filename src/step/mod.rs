// src/step/mod.rs

//! The execution contract for one unit of conversion work.
//!
//! - [`stats`] holds the per-item [`ProgressStats`] counters.
//! - [`tracker`] records counters and diagnostics for a step instance.
//! - [`job`] wraps a [`Step`] so that a failing item is logged instead of
//!   aborting the whole step.

pub mod job;
pub mod stats;
pub mod tracker;

pub use job::{Job, SerialJob};
pub use stats::ProgressStats;
pub use tracker::{LogEntry, LogKind, Tracker};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::dag::default_title;
use crate::store::StagedRecord;

/// Items a step processes, produced by the step itself.
pub type ItemSource<T> = Box<dyn Iterator<Item = T> + Send>;

/// One conversion step: items go in, staged records come out.
///
/// A step value is built in the parent process. For parallel runs it is
/// copied into each worker process, where [`Step::setup`] runs before the
/// first item.
pub trait Step: Send + 'static {
    /// Unit of work. Items cross process boundaries as JSON.
    type Item: Serialize + DeserializeOwned + Send + 'static;

    /// Names of the steps whose data this step reads.
    const DEPENDENCIES: &'static [&'static str] = &[];

    /// Scheduling priority among ready steps; lower runs first.
    const PRIORITY: Option<u32> = None;

    fn title(&self) -> String {
        default_title(std::any::type_name::<Self>())
    }

    /// Total amount of progress expected, if known up front.
    fn max_progress(&self) -> Option<u64> {
        None
    }

    /// Enumerate the items to convert.
    fn items(&self) -> anyhow::Result<ItemSource<Self::Item>>;

    /// Prepare step-local resources in the process that will call
    /// [`Step::process_item`].
    fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn process_item(
        &mut self,
        item: Self::Item,
        tracker: &mut Tracker,
    ) -> anyhow::Result<Vec<StagedRecord>>;

    /// Release step-local resources. Called once after the last item.
    fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
