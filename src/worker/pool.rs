// src/worker/pool.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use nix::sys::wait::WaitStatus;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::errors::{ConvoyError, Result};
use crate::lifecycle::{self, Lifecycle};
use crate::step::Job;
use crate::worker::{QueueItem, WorkQueue, Worker, WorkerOutput};

/// A fixed number of forked workers sharing one input and one output queue.
///
/// The pool owns the [`Lifecycle`] its workers are forked through; callers
/// register their fork hooks via [`WorkerPool::lifecycle_mut`] before
/// starting it.
pub struct WorkerPool<J: Job> {
    lifecycle: Lifecycle,
    input: Arc<WorkQueue<QueueItem<J::Item>>>,
    output: Arc<WorkQueue<WorkerOutput>>,
    workers: Vec<Worker<J>>,
    started: bool,
}

impl<J> WorkerPool<J>
where
    J: Job + Send,
    J::Item: Serialize + DeserializeOwned + Send + 'static,
{
    /// Build `size` workers, each with its own job from `factory(index)`.
    pub fn new<F>(size: usize, mut factory: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<J>,
    {
        if size == 0 {
            return Err(ConvoyError::ConfigError(
                "a worker pool needs at least one worker".to_string(),
            ));
        }

        let input = Arc::new(WorkQueue::unbounded());
        let output = Arc::new(WorkQueue::unbounded());
        let workers = (0..size)
            .map(|index| {
                let job = factory(index)?;
                Ok(Worker::new(
                    index,
                    Arc::clone(&input),
                    Arc::clone(&output),
                    job,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            lifecycle: Lifecycle::new(),
            input,
            output,
            workers,
            started: false,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    /// Fork every worker, then start streaming.
    ///
    /// All forks happen before any feeder or collector thread exists, and
    /// the parent-side fork hooks run once for the whole batch.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let workers = &mut self.workers;
        self.lifecycle.batch_forks(|lifecycle| {
            for worker in workers.iter_mut() {
                worker.fork_process(lifecycle)?;
            }
            Ok(())
        })?;

        for worker in &mut self.workers {
            worker.start_streams()?;
        }
        info!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    /// Feed `items` through the pool and hand every result to `on_output`.
    ///
    /// Items are tagged with their input position. With `preserve_order`,
    /// results are delivered in input order; otherwise in arrival order.
    /// Returns the number of results delivered. The pool can run only once:
    /// the input queue is closed when `items` is exhausted.
    pub fn run<I, F>(&mut self, items: I, preserve_order: bool, mut on_output: F) -> Result<usize>
    where
        I: IntoIterator<Item = J::Item>,
        I::IntoIter: Send,
        F: FnMut(WorkerOutput) -> Result<()>,
    {
        if self.input.is_closed() {
            return Err(ConvoyError::Other(anyhow::anyhow!(
                "worker pool has already run"
            )));
        }
        self.start()?;

        let items = items.into_iter();
        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);
        let results = Arc::clone(&self.output);
        let stop = Arc::clone(&self.input);
        let workers = &mut self.workers;

        let (fed, statuses, delivered, callback_error) = thread::scope(|scope| {
            let feeder = scope.spawn(move || -> Result<usize> {
                // Closed on every exit, including a panic in `items`.
                let _close = CloseOnDrop(&input);
                let mut count = 0usize;
                for (index, item) in items.enumerate() {
                    input.push(QueueItem::indexed(index, item))?;
                    count += 1;
                }
                Ok(count)
            });

            let waiter = scope.spawn(move || {
                let statuses: Vec<(usize, Result<WaitStatus>)> = workers
                    .iter_mut()
                    .map(|worker| (worker.index(), worker.wait()))
                    .collect();
                output.close();
                statuses
            });

            let mut pending = BTreeMap::new();
            let mut next = 0usize;
            let mut delivered = 0usize;
            let mut callback_error = None;

            while let Some(result) = results.pop() {
                if callback_error.is_some() {
                    continue;
                }
                let outcome = match (preserve_order, result.index) {
                    (true, Some(index)) => {
                        pending.insert(index, result);
                        let mut outcome = Ok(());
                        while let Some(ready) = pending.remove(&next) {
                            next += 1;
                            delivered += 1;
                            outcome = on_output(ready);
                            if outcome.is_err() {
                                break;
                            }
                        }
                        outcome
                    }
                    _ => {
                        delivered += 1;
                        on_output(result)
                    }
                };
                if let Err(err) = outcome {
                    // Stop handing out new items; workers finish what they hold.
                    stop.close();
                    callback_error = Some(err);
                }
            }

            // Gaps left by a failed worker: deliver the rest in index order.
            if callback_error.is_none() {
                for (_, result) in std::mem::take(&mut pending) {
                    delivered += 1;
                    if let Err(err) = on_output(result) {
                        callback_error = Some(err);
                        break;
                    }
                }
            }

            let fed = feeder.join().unwrap_or_else(|_| {
                Err(ConvoyError::Other(anyhow::anyhow!(
                    "item source panicked while feeding workers"
                )))
            });
            let statuses = waiter.join().map_err(|_| {
                ConvoyError::Other(anyhow::anyhow!("worker waiter panicked"))
            });
            (fed, statuses, delivered, callback_error)
        });

        if let Some(err) = callback_error {
            return Err(err);
        }
        let fed = fed?;
        debug!(fed, delivered, "worker pool drained");

        for (index, status) in statuses? {
            let status = status?;
            if !lifecycle::exited_cleanly(&status) {
                return Err(ConvoyError::WorkerFailed {
                    index,
                    status: format!("{status:?}"),
                });
            }
        }

        Ok(delivered)
    }
}

struct CloseOnDrop<'a, T>(&'a WorkQueue<T>);

impl<T> Drop for CloseOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl<J: Job> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.input.close();
        for worker in &mut self.workers {
            if worker.pid().is_none() {
                continue;
            }
            if let Err(err) = worker.wait() {
                warn!(worker = worker.index(), error = %err, "failed to reap worker");
            }
        }
    }
}
