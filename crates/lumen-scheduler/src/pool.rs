use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use lumen_core::catch_panic;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::executor::{ReduceExecutor, TaskExecutor};
use crate::reduce::{Payload, TaskKind};
use crate::task::{BatchHandle, TaskHandle, TaskId, TaskResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Worker threads started on first submit. `0` runs every task on the caller.
    pub workers: usize,
    pub task_timeout: Duration,
    /// Bounded queue length per worker.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            task_timeout: Duration::from_secs(30),
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// No task submitted since construction or the last `terminate`.
    Uninitialized,
    Threaded,
    /// Worker threads are unavailable; tasks run synchronously on the caller.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub mode: PoolMode,
    pub workers: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Queued,
    Running,
}

struct PendingTask {
    kind: &'static str,
    worker: usize,
    state: TaskState,
    tx: oneshot::Sender<TaskResult>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

struct Job {
    id: TaskId,
    kind: TaskKind,
    payload: Payload,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

/// State shared between the pool handle, its workers and its timers.
struct Shared {
    executor: Arc<dyn TaskExecutor>,
    pending: Mutex<HashMap<TaskId, PendingTask>>,
    counters: Counters,
}

impl Shared {
    /// Resolve `id` if it is still pending. Returns `false` for tasks that
    /// already resolved (cancelled, timed out, terminated).
    fn resolve(&self, id: TaskId, result: TaskResult) -> bool {
        let task = self.pending.lock().remove(&id);
        match task {
            Some(task) => {
                self.finish(id, task, result);
                true
            }
            None => false,
        }
    }

    fn finish(&self, id: TaskId, task: PendingTask, result: TaskResult) {
        if let Some(timer) = task.timer {
            timer.abort();
        }
        self.record(&result);
        if task.tx.send(result).is_err() {
            tracing::trace!(
                target = "lumen.pool",
                task_id = %id,
                kind = task.kind,
                "task handle dropped before the result arrived"
            );
        }
    }

    fn record(&self, result: &TaskResult) {
        let counter = match result {
            Ok(_) => &self.counters.completed,
            Err(TaskError::Timeout(_)) => &self.counters.timed_out,
            Err(TaskError::Cancelled) => &self.counters.cancelled,
            Err(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Worker {
    tx: Sender<Job>,
    /// Cleared by the worker's guard before it fails the worker's tasks.
    alive: Arc<AtomicBool>,
}

struct Threaded {
    workers: Vec<Worker>,
    next: usize,
    timer: Runtime,
}

enum Backend {
    Uninitialized,
    Threaded(Threaded),
    Inline,
}

struct PoolInner {
    config: PoolConfig,
    shared: Arc<Shared>,
    backend: Mutex<Backend>,
    next_id: AtomicU64,
}

/// Fixed-size pool of reduction workers.
///
/// Workers start lazily on the first submit and are dispatched round-robin,
/// each with its own bounded queue. A task that finds every queue full, or a
/// pool that cannot start any thread, runs the task synchronously on the
/// caller instead. Every task resolves exactly once.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

impl TaskPool {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_executor(config, Arc::new(ReduceExecutor))
    }

    pub fn with_executor(config: PoolConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                shared: Arc::new(Shared {
                    executor,
                    pending: Mutex::new(HashMap::new()),
                    counters: Counters::default(),
                }),
                backend: Mutex::new(Backend::Uninitialized),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn submit(&self, kind: TaskKind, payload: impl Into<Payload>) -> TaskHandle {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(id, rx);
        let job = Job {
            id,
            kind,
            payload: payload.into(),
        };

        let mut backend = self.inner.backend.lock();
        if matches!(*backend, Backend::Uninitialized) {
            *backend = self.inner.start();
        }
        let rejected = match &mut *backend {
            Backend::Threaded(threaded) => match self.inner.dispatch(threaded, job, tx) {
                Ok(()) => None,
                Err(rejected) => {
                    tracing::debug!(
                        target = "lumen.pool",
                        task_id = %id,
                        "every worker queue is full; running task on the caller"
                    );
                    Some(rejected)
                }
            },
            Backend::Inline | Backend::Uninitialized => Some((job, tx)),
        };
        drop(backend);

        if let Some((job, tx)) = rejected {
            self.inner.run_inline(job, tx);
        }
        handle
    }

    /// Submit several tasks at once. The batch resolves to their results in
    /// submission order.
    pub fn submit_many(
        &self,
        requests: impl IntoIterator<Item = (TaskKind, Payload)>,
    ) -> BatchHandle {
        let handles = requests
            .into_iter()
            .map(|(kind, payload)| self.submit(kind, payload))
            .collect();
        BatchHandle::new(handles)
    }

    /// Cancel a task that has not started yet. Returns `false` once a worker
    /// has picked it up or it has already resolved.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = {
            let mut pending = self.inner.shared.pending.lock();
            let queued = matches!(pending.get(&id), Some(task) if task.state == TaskState::Queued);
            if queued {
                pending.remove(&id)
            } else {
                None
            }
        };
        match task {
            Some(task) => {
                tracing::debug!(
                    target = "lumen.pool",
                    task_id = %id,
                    kind = task.kind,
                    "task cancelled"
                );
                self.inner.shared.finish(id, task, Err(TaskError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Reject every pending task with [`TaskError::Terminated`] and release
    /// the workers. The next submit starts a fresh set.
    pub fn terminate(&self) {
        self.inner.shutdown();
    }

    pub fn stats(&self) -> PoolStats {
        let (mode, workers) = match &*self.inner.backend.lock() {
            Backend::Uninitialized => (PoolMode::Uninitialized, 0),
            Backend::Threaded(threaded) => (PoolMode::Threaded, threaded.workers.len()),
            Backend::Inline => (PoolMode::Inline, 0),
        };
        let counters = &self.inner.shared.counters;
        PoolStats {
            mode,
            workers,
            in_flight: self.inner.shared.pending.lock().len(),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl PoolInner {
    fn start(&self) -> Backend {
        let requested = self.config.workers;
        if requested == 0 {
            tracing::debug!(target = "lumen.pool", "no workers configured; running tasks synchronously");
            return Backend::Inline;
        }

        let timer = match build_timer_runtime() {
            Ok(timer) => timer,
            Err(err) => {
                tracing::warn!(
                    target = "lumen.pool",
                    error = %err,
                    "failed to start task timer; running tasks synchronously"
                );
                return Backend::Inline;
            }
        };

        // Thread creation can fail under tight process limits. Keep whatever
        // started; with nothing started, degrade to synchronous execution.
        let mut workers = Vec::with_capacity(requested);
        for index in 0..requested {
            match spawn_worker(index, self.config.queue_capacity, Arc::clone(&self.shared)) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    tracing::warn!(
                        target = "lumen.pool",
                        error = %err,
                        started = workers.len(),
                        requested,
                        "failed to spawn task worker"
                    );
                    break;
                }
            }
        }

        if workers.is_empty() {
            timer.shutdown_background();
            tracing::warn!(
                target = "lumen.pool",
                "no task workers available; running tasks synchronously"
            );
            return Backend::Inline;
        }

        tracing::debug!(target = "lumen.pool", workers = workers.len(), "task pool started");
        Backend::Threaded(Threaded {
            workers,
            next: 0,
            timer,
        })
    }

    /// Hand `job` to the next worker with queue space. Gives the job back
    /// when every queue is full.
    #[allow(clippy::result_large_err)]
    fn dispatch(
        &self,
        threaded: &mut Threaded,
        job: Job,
        tx: oneshot::Sender<TaskResult>,
    ) -> Result<(), (Job, oneshot::Sender<TaskResult>)> {
        let id = job.id;
        let count = threaded.workers.len();

        // Registered before sending so a fast worker always finds the entry.
        self.shared.pending.lock().insert(
            id,
            PendingTask {
                kind: job.kind.name(),
                worker: threaded.next,
                state: TaskState::Queued,
                tx,
                timer: None,
            },
        );

        let mut job = job;
        for attempt in 0..count {
            let index = (threaded.next + attempt) % count;
            if let Some(task) = self.shared.pending.lock().get_mut(&id) {
                task.worker = index;
            }

            // A job handed to a dead worker between its guard running and its
            // queue closing would never run; replace the worker first.
            if !threaded.workers[index].alive.load(Ordering::SeqCst)
                && !self.respawn(threaded, index)
            {
                continue;
            }

            let sent = match threaded.workers[index].tx.try_send(job) {
                Err(TrySendError::Disconnected(returned)) => {
                    if self.respawn(threaded, index) {
                        threaded.workers[index].tx.try_send(returned)
                    } else {
                        Err(TrySendError::Disconnected(returned))
                    }
                }
                other => other,
            };

            match sent {
                Ok(()) => {
                    threaded.next = (index + 1) % count;
                    self.arm_timeout(threaded, id);
                    return Ok(());
                }
                Err(err) => job = err.into_inner(),
            }
        }

        match self.shared.pending.lock().remove(&id) {
            Some(task) => Err((job, task.tx)),
            None => Ok(()),
        }
    }

    fn respawn(&self, threaded: &mut Threaded, index: usize) -> bool {
        tracing::warn!(target = "lumen.pool", worker = index, "task worker exited; respawning");
        match spawn_worker(index, self.config.queue_capacity, Arc::clone(&self.shared)) {
            Ok(worker) => {
                threaded.workers[index] = worker;
                true
            }
            Err(err) => {
                tracing::warn!(
                    target = "lumen.pool",
                    worker = index,
                    error = %err,
                    "failed to respawn task worker"
                );
                false
            }
        }
    }

    fn arm_timeout(&self, threaded: &Threaded, id: TaskId) {
        let timeout = self.config.task_timeout;
        let shared = Arc::downgrade(&self.shared);
        let timer = threaded.timer.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let task = shared.pending.lock().remove(&id);
            if let Some(mut task) = task {
                tracing::warn!(
                    target = "lumen.pool",
                    task_id = %id,
                    kind = task.kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "task timed out"
                );
                task.timer = None;
                shared.finish(id, task, Err(TaskError::Timeout(timeout)));
            }
        });

        let mut pending = self.shared.pending.lock();
        match pending.get_mut(&id) {
            Some(task) => task.timer = Some(timer),
            None => timer.abort(),
        }
    }

    fn run_inline(&self, job: Job, tx: oneshot::Sender<TaskResult>) {
        let result = execute(self.shared.executor.as_ref(), job);
        self.shared.record(&result);
        let _ = tx.send(result);
    }

    fn shutdown(&self) {
        let backend = std::mem::replace(&mut *self.backend.lock(), Backend::Uninitialized);
        let drained: Vec<(TaskId, PendingTask)> = self.shared.pending.lock().drain().collect();
        let rejected = drained.len();
        for (id, task) in drained {
            self.shared.finish(id, task, Err(TaskError::Terminated));
        }

        if let Backend::Threaded(threaded) = backend {
            // Closing the queues ends each worker after its current task;
            // results of tasks still running are discarded.
            drop(threaded.workers);
            threaded.timer.shutdown_background();
            tracing::debug!(target = "lumen.pool", rejected, "task pool terminated");
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_timer_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .thread_name("lumen-pool-timer")
        .build()
}

fn spawn_worker(index: usize, capacity: usize, shared: Arc<Shared>) -> std::io::Result<Worker> {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let alive = Arc::new(AtomicBool::new(true));
    let guard = WorkerGuard {
        index,
        alive: Arc::clone(&alive),
        shared: Arc::clone(&shared),
    };
    thread::Builder::new()
        .name(format!("lumen-worker-{index}"))
        .spawn(move || worker_loop(index, rx, shared, guard))?;
    Ok(Worker { tx, alive })
}

fn worker_loop(index: usize, rx: Receiver<Job>, shared: Arc<Shared>, _guard: WorkerGuard) {

    for job in rx.iter() {
        let id = job.id;
        {
            let mut pending = shared.pending.lock();
            let Some(task) = pending.get_mut(&id) else {
                // Cancelled, timed out or terminated while queued.
                continue;
            };
            task.state = TaskState::Running;
        }

        let result = execute(shared.executor.as_ref(), job);
        if !shared.resolve(id, result) {
            tracing::debug!(
                target = "lumen.pool",
                task_id = %id,
                worker = index,
                "discarding result of a task that already resolved"
            );
        }
    }
}

/// The single execution path shared by workers and the synchronous fallback.
fn execute(executor: &dyn TaskExecutor, job: Job) -> TaskResult {
    let Job { id, kind, payload } = job;
    match catch_panic(|| executor.execute(&kind, payload)) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => {
            tracing::debug!(
                target = "lumen.pool",
                task_id = %id,
                kind = kind.name(),
                error = %err,
                "task rejected"
            );
            Err(TaskError::InvalidTask(err))
        }
        Err(panic) => {
            tracing::error!(
                target = "lumen.pool",
                task_id = %id,
                kind = kind.name(),
                panic = %panic,
                "task panicked"
            );
            Err(TaskError::WorkerFailure(panic))
        }
    }
}

/// Rejects the tasks owned by a worker whose thread unwinds.
struct WorkerGuard {
    index: usize,
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        // Dispatch checks the flag after recording the task's worker, so any
        // task sent after this point is either seen below or re-routed.
        self.alive.store(false, Ordering::SeqCst);
        let orphaned: Vec<(TaskId, PendingTask)> = {
            let mut pending = self.shared.pending.lock();
            let ids: Vec<TaskId> = pending
                .iter()
                .filter(|(_, task)| task.worker == self.index)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|task| (id, task)))
                .collect()
        };
        tracing::error!(
            target = "lumen.pool",
            worker = self.index,
            orphaned = orphaned.len(),
            "task worker died"
        );
        let reason = format!("worker {} exited unexpectedly", self.index);
        for (id, task) in orphaned {
            self.shared.finish(id, task, Err(TaskError::WorkerFailure(reason.clone())));
        }
    }
}
