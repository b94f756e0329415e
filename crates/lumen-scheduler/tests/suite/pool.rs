use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use lumen_scheduler::reduce;
use lumen_scheduler::{
    Aggregate, DownsampleMethod, DownsampleOptions, Payload, PoolConfig, PoolMode, ReduceError,
    SampleMethod, SampleOptions, TaskError, TaskExecutor, TaskKind, TaskOutput, TaskPool,
    TransformOptions,
};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Holds every `Optimize` task until released; other kinds run immediately.
struct GatedExecutor {
    started: Sender<()>,
    release: Receiver<()>,
}

impl TaskExecutor for GatedExecutor {
    fn execute(&self, kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError> {
        if let TaskKind::Optimize = kind {
            let _ = self.started.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(10));
        }
        reduce::run(kind, payload)
    }
}

struct Gate {
    started: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    fn wait_started(&self) {
        self.started
            .recv_timeout(Duration::from_secs(5))
            .expect("gated task should start");
    }

    fn open(&self, count: usize) {
        for _ in 0..count {
            self.release.send(()).unwrap();
        }
    }
}

fn gated_pool(config: PoolConfig) -> (TaskPool, Gate) {
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let executor = GatedExecutor {
        started: started_tx,
        release: release_rx,
    };
    let pool = TaskPool::with_executor(config, Arc::new(executor));
    let gate = Gate {
        started: started_rx,
        release: release_tx,
    };
    (pool, gate)
}

fn config(workers: usize) -> PoolConfig {
    PoolConfig {
        workers,
        ..PoolConfig::default()
    }
}

#[test]
fn worker_and_fallback_paths_agree() {
    let requests = vec![
        (TaskKind::Aggregate, Payload::numbers([1.0, 2.0, 3.0, 4.0])),
        (TaskKind::Filter, Payload::Values(vec![json!(1), json!(null), json!(3)])),
        (
            TaskKind::Transform(TransformOptions::Scale {
                factor: 10.0,
                offset: 0.0,
            }),
            Payload::numbers([1.0, 2.0]),
        ),
        (
            TaskKind::Sample(SampleOptions::count(SampleMethod::Lttb, 4)),
            Payload::numbers((0..50).map(|i| ((i * 7) % 11) as f64)),
        ),
        (
            TaskKind::Downsample(DownsampleOptions::new(4, DownsampleMethod::Max)),
            Payload::numbers([3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]),
        ),
        (TaskKind::Compress, Payload::numbers([1.0, 1.0, 2.0])),
    ];

    let inline = TaskPool::new(config(0));
    let threaded = TaskPool::new(config(2));
    for (kind, payload) in requests {
        let expected = inline.submit(kind.clone(), payload.clone()).blocking_join();
        let actual = threaded.submit(kind.clone(), payload).blocking_join();
        assert_eq!(actual, expected, "{} differs between paths", kind.name());
    }
    assert_eq!(inline.stats().mode, PoolMode::Inline);
    assert_eq!(threaded.stats().mode, PoolMode::Threaded);
}

#[test]
fn aggregate_matches_on_either_path() {
    let expected = TaskOutput::Summary(Aggregate {
        sum: 10.0,
        avg: 2.5,
        min: Some(1.0),
        max: Some(4.0),
        count: 4,
    });
    for workers in [0, 4] {
        let pool = TaskPool::new(config(workers));
        let output = pool
            .submit(TaskKind::Aggregate, Payload::numbers([1.0, 2.0, 3.0, 4.0]))
            .blocking_join()
            .unwrap();
        assert_eq!(output, expected);
    }
}

#[test]
fn uniform_sampling_is_deterministic_through_the_pool() {
    let pool = TaskPool::new(config(2));
    let data: Vec<f64> = (1..=10).map(|i| (i * 10) as f64).collect();
    let kind = TaskKind::Sample(SampleOptions::count(SampleMethod::Uniform, 5));

    let first = pool
        .submit(kind.clone(), Payload::numbers(data.clone()))
        .blocking_join()
        .unwrap();
    for _ in 0..5 {
        let again = pool
            .submit(kind.clone(), Payload::numbers(data.clone()))
            .blocking_join()
            .unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(first.into_values().unwrap().len(), 5);
}

#[test]
fn batches_resolve_in_submission_order() {
    let pool = TaskPool::new(config(3));
    let requests = (0..20).map(|i| (TaskKind::Aggregate, Payload::numbers([i as f64])));
    let batch = pool.submit_many(requests);
    assert_eq!(batch.ids().len(), 20);

    let sums: Vec<f64> = batch
        .blocking_join()
        .unwrap()
        .iter()
        .map(|output| output.summary().unwrap().sum)
        .collect();
    assert_eq!(sums, (0..20).map(|i| i as f64).collect::<Vec<_>>());
}

#[test]
fn batch_fails_with_the_first_error() {
    let pool = TaskPool::new(config(2));
    let batch = pool.submit_many(vec![
        (TaskKind::Filter, Payload::numbers([1.0])),
        (
            TaskKind::Downsample(DownsampleOptions::new(0, DownsampleMethod::First)),
            Payload::numbers([1.0]),
        ),
    ]);
    assert!(matches!(
        batch.blocking_join(),
        Err(TaskError::InvalidTask(ReduceError::InvalidOptions(_)))
    ));
}

struct SlowExecutor(Duration);

impl TaskExecutor for SlowExecutor {
    fn execute(&self, kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError> {
        thread::sleep(self.0);
        reduce::run(kind, payload)
    }
}

#[test]
fn stuck_task_times_out_once() {
    let timeout = Duration::from_millis(50);
    let pool = TaskPool::with_executor(
        PoolConfig {
            workers: 1,
            task_timeout: timeout,
            ..PoolConfig::default()
        },
        Arc::new(SlowExecutor(Duration::from_millis(400))),
    );

    let submitted = Instant::now();
    let result = pool
        .submit(TaskKind::Filter, Payload::numbers([1.0]))
        .blocking_join();
    assert_eq!(result, Err(TaskError::Timeout(timeout)));
    assert!(submitted.elapsed() < Duration::from_millis(350));

    // The late result is discarded rather than resolving the task again.
    thread::sleep(Duration::from_millis(500));
    let stats = pool.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn only_queued_tasks_can_be_cancelled() {
    let (pool, gate) = gated_pool(config(1));

    let running = pool.submit(TaskKind::Optimize, Payload::numbers([1.0]));
    gate.wait_started();
    let queued = pool.submit(TaskKind::Filter, Payload::numbers([2.0]));

    assert!(pool.cancel(queued.id()));
    assert!(!pool.cancel(queued.id()));
    assert!(!pool.cancel(running.id()));
    assert_eq!(queued.blocking_join(), Err(TaskError::Cancelled));

    gate.open(1);
    assert_eq!(
        running.blocking_join(),
        Ok(TaskOutput::Values(vec![json!(1.0)]))
    );
    let stats = pool.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn full_queues_fall_back_to_the_caller() {
    let (pool, gate) = gated_pool(PoolConfig {
        workers: 1,
        queue_capacity: 1,
        ..PoolConfig::default()
    });

    let running = pool.submit(TaskKind::Optimize, Payload::numbers([1.0]));
    gate.wait_started();
    let queued = pool.submit(TaskKind::Optimize, Payload::numbers([2.0]));

    // The only queue is full, so this one runs before `submit` returns.
    let overflow = pool.submit(TaskKind::Aggregate, Payload::numbers([5.0]));
    assert_eq!(overflow.blocking_join().unwrap().summary().unwrap().sum, 5.0);

    gate.open(2);
    assert!(running.blocking_join().is_ok());
    assert!(queued.blocking_join().is_ok());
}

#[test]
fn terminate_rejects_pending_tasks_and_restarts_lazily() {
    let (pool, gate) = gated_pool(config(1));

    let running = pool.submit(TaskKind::Optimize, Payload::numbers([1.0]));
    gate.wait_started();
    let queued = pool.submit(TaskKind::Filter, Payload::numbers([2.0]));

    pool.terminate();
    assert_eq!(running.blocking_join(), Err(TaskError::Terminated));
    assert_eq!(queued.blocking_join(), Err(TaskError::Terminated));
    let stats = pool.stats();
    assert_eq!(stats.mode, PoolMode::Uninitialized);
    assert_eq!(stats.in_flight, 0);

    // Let the abandoned worker finish; its result goes nowhere.
    gate.open(1);

    let fresh = pool
        .submit(TaskKind::Aggregate, Payload::numbers([2.0]))
        .blocking_join()
        .unwrap();
    assert_eq!(fresh.summary().unwrap().count, 1);
    assert_eq!(pool.stats().mode, PoolMode::Threaded);
}

struct PanickyExecutor;

impl TaskExecutor for PanickyExecutor {
    fn execute(&self, kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError> {
        if let TaskKind::Compress = kind {
            panic!("codec exploded");
        }
        reduce::run(kind, payload)
    }
}

#[test]
fn panicking_task_fails_alone() {
    for workers in [0, 1] {
        let pool = TaskPool::with_executor(config(workers), Arc::new(PanickyExecutor));

        let failed = pool
            .submit(TaskKind::Compress, Payload::numbers([1.0]))
            .blocking_join();
        match failed {
            Err(TaskError::WorkerFailure(message)) => assert!(message.contains("codec exploded")),
            other => panic!("expected a worker failure, got {other:?}"),
        }

        let next = pool
            .submit(TaskKind::Aggregate, Payload::numbers([3.0]))
            .blocking_join();
        assert!(next.is_ok());
        assert_eq!(pool.stats().failed, 1);
    }
}

/// A panic payload whose destructor panics again. The second panic fires
/// after the executor's unwind boundary and takes the worker thread down.
struct Tripwire;

impl Drop for Tripwire {
    fn drop(&mut self) {
        panic!("panic payload dropped");
    }
}

/// Holds `Optimize` tasks until released, then kills the worker thread.
struct FatalExecutor {
    started: Sender<()>,
    release: Receiver<()>,
}

impl TaskExecutor for FatalExecutor {
    fn execute(&self, kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError> {
        if let TaskKind::Optimize = kind {
            let _ = self.started.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(10));
            std::panic::panic_any(Tripwire);
        }
        reduce::run(kind, payload)
    }
}

#[test]
fn dead_worker_fails_its_queue_and_is_replaced() {
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let executor = FatalExecutor {
        started: started_tx,
        release: release_rx,
    };
    let gate = Gate {
        started: started_rx,
        release: release_tx,
    };
    let pool = TaskPool::with_executor(config(1), Arc::new(executor));

    let running = pool.submit(TaskKind::Optimize, Payload::numbers([1.0]));
    gate.wait_started();
    let queued: Vec<_> = (0..2)
        .map(|_| pool.submit(TaskKind::Filter, Payload::numbers([2.0])))
        .collect();
    gate.open(1);

    assert!(matches!(running.blocking_join(), Err(TaskError::WorkerFailure(_))));
    for handle in queued {
        match handle.blocking_join() {
            Err(TaskError::WorkerFailure(message)) => {
                assert!(message.contains("exited unexpectedly"))
            }
            other => panic!("expected a worker failure, got {other:?}"),
        }
    }

    let output = pool
        .submit(TaskKind::Aggregate, Payload::numbers([1.0, 2.0]))
        .blocking_join()
        .unwrap();
    assert_eq!(output.summary().map(|summary| summary.sum), Some(3.0));
    let stats = pool.stats();
    assert_eq!(stats.mode, PoolMode::Threaded);
    assert_eq!(stats.workers, 1);
    assert_eq!(stats.failed, 3);
}

#[test]
fn malformed_options_are_rejected() {
    let pool = TaskPool::new(config(1));
    let result = pool
        .submit(
            TaskKind::Downsample(DownsampleOptions::new(0, DownsampleMethod::Average)),
            Payload::numbers([1.0, 2.0]),
        )
        .blocking_join();
    assert!(matches!(
        result,
        Err(TaskError::InvalidTask(ReduceError::InvalidOptions(_)))
    ));

    let result = pool
        .submit(TaskKind::Filter, Payload::Runs(Vec::new()))
        .blocking_join();
    assert_eq!(
        result,
        Err(TaskError::InvalidTask(ReduceError::UnexpectedRuns { kind: "filter" }))
    );
}

#[tokio::test]
async fn handles_can_be_awaited() {
    let pool = TaskPool::new(config(2));
    let compressed = pool
        .submit(TaskKind::Compress, Payload::numbers([7.0, 7.0, 7.0]))
        .await
        .unwrap()
        .into_runs()
        .unwrap();
    assert_eq!(compressed.len(), 1);
    assert_eq!(compressed[0].count, 3);

    let restored = pool
        .submit(TaskKind::Decompress, Payload::Runs(compressed))
        .await
        .unwrap();
    assert_eq!(
        restored,
        TaskOutput::Values(vec![json!(7.0), json!(7.0), json!(7.0)])
    );
}
