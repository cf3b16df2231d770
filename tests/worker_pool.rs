use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use convoy::errors::ConvoyError;
use convoy::lifecycle::{self, Lifecycle};
use convoy::worker::{QueueItem, WorkQueue, Worker, WorkerOutput, WorkerPool};
use convoy_test_utils::steps::{RecordingJob, read_events};

mod common;

fn event_log(dir: &Path, worker: usize) -> PathBuf {
    dir.join(format!("worker-{worker}.log"))
}

fn count(events: &[String], wanted: &str) -> usize {
    events.iter().filter(|e| e.as_str() == wanted).count()
}

#[test]
fn test_queue_pop_returns_none_once_closed_and_drained() {
    let queue = WorkQueue::unbounded();
    queue.push(1).unwrap();
    queue.push(2).unwrap();
    queue.close();

    assert!(queue.is_closed());
    assert!(queue.push(3).is_err());
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.pop(), Some(2));
    assert_eq!(queue.pop(), None);
    assert!(queue.is_empty());
}

#[test]
fn test_bounded_queue_blocks_producer_until_consumed() {
    let queue = Arc::new(WorkQueue::bounded(1));
    queue.push("first").unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.push("second"))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.len(), 1);

    assert_eq!(queue.pop(), Some("first"));
    producer.join().unwrap().unwrap();
    assert_eq!(queue.pop(), Some("second"));
}

#[test]
fn test_close_wakes_blocked_consumers() {
    let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::unbounded());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop())
    };

    thread::sleep(Duration::from_millis(20));
    queue.close();
    assert_eq!(consumer.join().unwrap(), None);
}

#[test]
fn test_single_worker_runs_every_item_then_cleans_up_once() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();
    let events = event_log(dir.path(), 0);

    let input = Arc::new(WorkQueue::unbounded());
    let output = Arc::new(WorkQueue::unbounded());
    let mut worker = Worker::new(
        0,
        Arc::clone(&input),
        Arc::clone(&output),
        RecordingJob::new(&events).failing_on(&[2]),
    );

    worker.start(&mut Lifecycle::new()).unwrap();
    assert!(worker.pid().is_some());

    for item in 0..5u64 {
        input.push(QueueItem::indexed(item as usize, item)).unwrap();
    }
    input.close();

    let status = worker.wait().unwrap();
    assert!(lifecycle::exited_cleanly(&status));
    assert!(worker.pid().is_none());

    output.close();
    let mut results: Vec<WorkerOutput> = Vec::new();
    while let Some(result) = output.pop() {
        results.push(result);
    }

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.worker == 0));
    let errors: u64 = results.iter().map(|r| r.stats.error_count).sum();
    assert_eq!(errors, 1);

    assert_eq!(
        read_events(&events),
        vec!["setup", "run 0", "run 1", "run 2", "run 3", "run 4", "cleanup"]
    );
}

#[test]
fn test_worker_with_no_items_still_cleans_up() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();
    let events = event_log(dir.path(), 0);

    let input: Arc<WorkQueue<QueueItem<u64>>> = Arc::new(WorkQueue::unbounded());
    let output = Arc::new(WorkQueue::unbounded());
    let mut worker = Worker::new(0, Arc::clone(&input), output, RecordingJob::new(&events));

    worker.start(&mut Lifecycle::new()).unwrap();
    input.close();

    assert!(lifecycle::exited_cleanly(&worker.wait().unwrap()));
    assert_eq!(read_events(&events), vec!["setup", "cleanup"]);
}

#[test]
fn test_pool_delivers_every_item_once() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool =
        WorkerPool::new(3, |i| Ok(RecordingJob::new(event_log(dir.path(), i)))).unwrap();
    assert_eq!(pool.size(), 3);

    let mut seen = Vec::new();
    let delivered = pool
        .run(0..30u64, false, |result| {
            assert!(result.worker < 3);
            seen.push(result.index.unwrap());
            Ok(())
        })
        .unwrap();

    assert_eq!(delivered, 30);
    seen.sort_unstable();
    assert_eq!(seen, (0..30).collect::<Vec<_>>());

    let mut runs = 0;
    for worker in 0..3 {
        let events = read_events(&event_log(dir.path(), worker));
        assert_eq!(count(&events, "setup"), 1);
        assert_eq!(count(&events, "cleanup"), 1);
        assert_eq!(events.last().map(String::as_str), Some("cleanup"));
        runs += events.iter().filter(|e| e.starts_with("run ")).count();
    }
    assert_eq!(runs, 30);
}

#[test]
fn test_pool_preserves_input_order_when_asked() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool =
        WorkerPool::new(4, |i| Ok(RecordingJob::new(event_log(dir.path(), i)))).unwrap();

    let mut seen = Vec::new();
    pool.run(0..50u64, true, |result| {
        seen.push(result.index.unwrap());
        Ok(())
    })
    .unwrap();

    assert_eq!(seen, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_item_failures_come_back_as_stats() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool = WorkerPool::new(2, |i| {
        Ok(RecordingJob::new(event_log(dir.path(), i)).failing_on(&[3, 7]))
    })
    .unwrap();

    let mut errors = 0;
    let delivered = pool
        .run(0..10u64, false, |result| {
            errors += result.stats.error_count;
            Ok(())
        })
        .unwrap();

    assert_eq!(delivered, 10);
    assert_eq!(errors, 2);
}

#[test]
fn test_dead_worker_is_reported() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool = WorkerPool::new(2, |i| {
        Ok(RecordingJob::new(event_log(dir.path(), i)).exiting_on(5))
    })
    .unwrap();

    let result = pool.run(0..10u64, false, |_| Ok(()));
    match result {
        Err(ConvoyError::WorkerFailed { status, .. }) => assert!(status.contains('3')),
        other => panic!("expected WorkerFailed, got {other:?}"),
    }
}

#[test]
fn test_callback_error_stops_the_run() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool =
        WorkerPool::new(2, |i| Ok(RecordingJob::new(event_log(dir.path(), i)))).unwrap();

    let result = pool.run(0..10u64, false, |_| {
        Err(ConvoyError::Other(anyhow::anyhow!("stop here")))
    });
    match result {
        Err(err) => assert!(err.to_string().contains("stop here")),
        Ok(n) => panic!("expected the callback error, got {n} results"),
    }

    // Every worker still shuts down through cleanup.
    for worker in 0..2 {
        let events = read_events(&event_log(dir.path(), worker));
        assert_eq!(count(&events, "cleanup"), 1);
    }
}

#[test]
fn test_panicking_item_source_fails_the_run() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool =
        WorkerPool::new(2, |i| Ok(RecordingJob::new(event_log(dir.path(), i)))).unwrap();

    let items = (0..5u64).map(|i| {
        if i == 3 {
            panic!("row 3 could not be decoded");
        }
        i
    });
    let mut delivered = 0;
    let result = pool.run(items, false, |_| {
        delivered += 1;
        Ok(())
    });

    match result {
        Err(err) => assert!(err.to_string().contains("item source panicked")),
        Ok(n) => panic!("expected the run to fail, got {n} results"),
    }
    // Items fed before the panic are still processed.
    assert_eq!(delivered, 3);
    for worker in 0..2 {
        let events = read_events(&event_log(dir.path(), worker));
        assert_eq!(count(&events, "cleanup"), 1);
    }
}

#[test]
fn test_pool_runs_only_once() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool =
        WorkerPool::new(1, |i| Ok(RecordingJob::new(event_log(dir.path(), i)))).unwrap();
    assert_eq!(pool.run(0..3u64, false, |_| Ok(())).unwrap(), 3);
    assert!(pool.run(0..3u64, false, |_| Ok(())).is_err());
}

#[test]
fn test_dropping_a_started_pool_reaps_workers() {
    let _guard = common::fork_guard();
    let dir = tempfile::tempdir().unwrap();

    let mut pool =
        WorkerPool::new(2, |i| Ok(RecordingJob::new(event_log(dir.path(), i)))).unwrap();
    pool.start().unwrap();
    drop(pool);

    for worker in 0..2 {
        assert_eq!(
            read_events(&event_log(dir.path(), worker)),
            vec!["setup", "cleanup"]
        );
    }
}

#[test]
fn test_pool_needs_at_least_one_worker() {
    let result = WorkerPool::new(0, |_| Ok(RecordingJob::new("unused.log")));
    assert!(matches!(result, Err(ConvoyError::ConfigError(_))));
}
