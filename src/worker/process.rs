// src/worker/process.rs

//! A single forked worker process.
//!
//! The parent and the child talk over two pipes carrying newline-delimited
//! JSON:
//!
//! ```text
//!   input queue -> [feeder thread] -> pipe -> child: job.run(item)
//!   output queue <- [collector thread] <- pipe <- child: WorkerOutput
//! ```
//!
//! The child exits once its input pipe reaches EOF, which happens when the
//! feeder thread finds the input queue closed and drained.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::sys::wait::WaitStatus;
use nix::unistd::{Pid, close, pipe};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ConvoyError, Result};
use crate::lifecycle::{self, Lifecycle};
use crate::step::{Job, LogEntry, ProgressStats};
use crate::worker::WorkQueue;

/// Payload plus the position it had in the input, if the caller needs to
/// restore input order from the unordered output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem<T> {
    pub index: Option<usize>,
    pub payload: T,
}

impl<T> QueueItem<T> {
    pub fn new(payload: T) -> Self {
        Self {
            index: None,
            payload,
        }
    }

    pub fn indexed(index: usize, payload: T) -> Self {
        Self {
            index: Some(index),
            payload,
        }
    }
}

/// Result of one item, as published on the output queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub worker: usize,
    pub index: Option<usize>,
    pub stats: ProgressStats,
    pub log: Vec<LogEntry>,
}

struct Running {
    pid: Pid,
    to_child: Option<OwnedFd>,
    from_child: Option<OwnedFd>,
    feeder: Option<JoinHandle<Result<u64>>>,
    collector: Option<JoinHandle<Result<u64>>>,
}

pub struct Worker<J: Job> {
    index: usize,
    input: Arc<WorkQueue<QueueItem<J::Item>>>,
    output: Arc<WorkQueue<WorkerOutput>>,
    job: Option<J>,
    running: Option<Running>,
}

impl<J: Job> Worker<J> {
    pub fn new(
        index: usize,
        input: Arc<WorkQueue<QueueItem<J::Item>>>,
        output: Arc<WorkQueue<WorkerOutput>>,
        job: J,
    ) -> Self {
        Self {
            index,
            input,
            output,
            job: Some(job),
            running: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> Option<Pid> {
        self.running.as_ref().map(|r| r.pid)
    }

    /// Block until the child has exited and both streams are finished.
    ///
    /// The input queue must be closed for this to return.
    pub fn wait(&mut self) -> Result<WaitStatus> {
        let running = self.running.take().ok_or_else(|| {
            ConvoyError::Other(anyhow::anyhow!("worker {} is not running", self.index))
        })?;

        // Dropping unused pipe ends lets a never-streamed child see EOF.
        drop(running.to_child);
        drop(running.from_child);

        if let Some(feeder) = running.feeder {
            match join(feeder) {
                Ok(sent) => debug!(worker = self.index, sent, "feeder finished"),
                Err(err) => warn!(worker = self.index, error = %err, "feeder stopped early"),
            }
        }

        let received = match running.collector {
            Some(collector) => join(collector),
            None => Ok(0),
        };

        let status = lifecycle::wait_for(running.pid)?;
        debug!(worker = self.index, ?status, "worker process exited");

        let received = received?;
        debug!(worker = self.index, received, "collector finished");
        Ok(status)
    }
}

impl<J> Worker<J>
where
    J: Job,
    J::Item: Serialize + DeserializeOwned + Send + 'static,
{
    /// Fork the worker process and start moving items to and from it.
    pub fn start(&mut self, lifecycle: &mut Lifecycle) -> Result<()> {
        self.fork_process(lifecycle)?;
        self.start_streams()
    }

    /// Fork the child process. The parent keeps its pipe ends but moves no
    /// data until [`Worker::start_streams`] runs.
    pub(crate) fn fork_process(&mut self, lifecycle: &mut Lifecycle) -> Result<()> {
        let job = self.job.take().ok_or_else(|| {
            ConvoyError::Other(anyhow::anyhow!("worker {} was already started", self.index))
        })?;

        let (child_reads, parent_writes) = pipe()?;
        let (parent_reads, child_writes) = pipe()?;
        let keep = [child_reads.as_raw_fd(), child_writes.as_raw_fd()];
        let index = self.index;

        // The closure owns the child's pipe ends, so the parent closes them
        // when `fork` drops it.
        let pid = lifecycle.fork(move || {
            close_inherited_fds(&keep);
            run_child(index, job, File::from(child_reads), File::from(child_writes))
        })?;

        debug!(worker = self.index, pid = %pid, "worker process started");
        self.running = Some(Running {
            pid,
            to_child: Some(parent_writes),
            from_child: Some(parent_reads),
            feeder: None,
            collector: None,
        });
        Ok(())
    }

    /// Spawn the feeder and collector threads for a forked worker.
    pub(crate) fn start_streams(&mut self) -> Result<()> {
        let index = self.index;
        let running = self.running.as_mut().ok_or_else(|| {
            ConvoyError::Other(anyhow::anyhow!("worker {index} has no running process"))
        })?;

        if let Some(fd) = running.to_child.take() {
            let input = Arc::clone(&self.input);
            running.feeder = Some(
                thread::Builder::new()
                    .name(format!("convoy-feed-{index}"))
                    .spawn(move || feed(input, File::from(fd)))?,
            );
        }

        if let Some(fd) = running.from_child.take() {
            let output = Arc::clone(&self.output);
            running.collector = Some(
                thread::Builder::new()
                    .name(format!("convoy-collect-{index}"))
                    .spawn(move || collect(output, File::from(fd)))?,
            );
        }

        Ok(())
    }
}

fn join(handle: JoinHandle<Result<u64>>) -> Result<u64> {
    handle
        .join()
        .map_err(|_| ConvoyError::Other(anyhow::anyhow!("worker stream thread panicked")))?
}

/// Parent side: move items from the input queue into the child's pipe.
fn feed<T: Serialize>(input: Arc<WorkQueue<QueueItem<T>>>, pipe: File) -> Result<u64> {
    let mut writer = BufWriter::new(pipe);
    let mut sent = 0;
    while let Some(item) = input.pop() {
        serde_json::to_writer(&mut writer, &item)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        sent += 1;
    }
    Ok(sent)
}

/// Parent side: move results from the child's pipe onto the output queue.
fn collect(output: Arc<WorkQueue<WorkerOutput>>, pipe: File) -> Result<u64> {
    let mut received = 0;
    for line in BufReader::new(pipe).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        output.push(serde_json::from_str(&line)?)?;
        received += 1;
    }
    Ok(received)
}

/// Child side: returns the process exit code.
fn run_child<J>(index: usize, mut job: J, input: File, output: File) -> i32
where
    J: Job,
    J::Item: DeserializeOwned,
{
    let processed = process_items(index, &mut job, input, output);
    let cleaned = job.cleanup();

    match (processed, cleaned) {
        (Ok(()), Ok(())) => 0,
        (Err(err), _) | (_, Err(err)) => {
            eprintln!("convoy worker {index} failed: {err}");
            1
        }
    }
}

fn process_items<J>(index: usize, job: &mut J, input: File, output: File) -> Result<()>
where
    J: Job,
    J::Item: DeserializeOwned,
{
    job.setup()?;

    let mut writer = BufWriter::new(output);
    for line in BufReader::new(input).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let item: QueueItem<J::Item> = serde_json::from_str(&line)?;
        let stats = job.run(item.payload)?;
        let result = WorkerOutput {
            worker: index,
            index: item.index,
            stats,
            log: job.drain_log(),
        };
        serde_json::to_writer(&mut writer, &result)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

/// Close every descriptor above stderr except `keep`.
///
/// A fresh child inherits all descriptors of its parent, including pipe ends
/// belonging to sibling workers; holding those would keep the siblings from
/// ever seeing EOF.
fn close_inherited_fds(keep: &[RawFd]) {
    let open: Vec<RawFd> = match fs::read_dir("/proc/self/fd").or_else(|_| fs::read_dir("/dev/fd")) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect(),
        Err(_) => (3..1024).collect(),
    };

    for fd in open {
        if fd > 2 && !keep.contains(&fd) {
            let _ = close(fd);
        }
    }
}
