// src/worker/mod.rs

//! Multi-process execution of jobs.
//!
//! - [`queue`] provides the blocking FIFO the pool's threads share.
//! - [`process`] forks one worker and streams items to it over pipes.
//! - [`pool`] runs a fixed number of workers over one item stream.

pub mod pool;
pub mod process;
pub mod queue;

pub use pool::WorkerPool;
pub use process::{QueueItem, Worker, WorkerOutput};
pub use queue::WorkQueue;
