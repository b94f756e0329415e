use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::TryJoinAll;
use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::reduce::TaskOutput;

pub(crate) type TaskResult = Result<TaskOutput, TaskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The eventual result of a submitted task.
///
/// Await it from async code or call [`TaskHandle::blocking_join`] from a
/// plain thread. Dropping the handle does not cancel the task.
#[must_use = "a task result is only observable through its handle"]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block the current thread until the task resolves.
    ///
    /// Panics when called from within an async execution context.
    pub fn blocking_join(self) -> TaskResult {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(sender_dropped()))
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(sender_dropped())))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

fn sender_dropped() -> TaskError {
    TaskError::WorkerFailure("task was dropped without a result".to_string())
}

/// Results of [`crate::TaskPool::submit_many`], in submission order.
///
/// Resolves with the first error if any task fails; the remaining tasks keep
/// running and their results are discarded.
#[must_use = "batch results are only observable through the handle"]
pub struct BatchHandle {
    ids: Vec<TaskId>,
    join: Pin<Box<TryJoinAll<TaskHandle>>>,
}

impl BatchHandle {
    pub(crate) fn new(handles: Vec<TaskHandle>) -> Self {
        let ids = handles.iter().map(TaskHandle::id).collect();
        Self {
            ids,
            join: Box::pin(futures::future::try_join_all(handles)),
        }
    }

    pub fn ids(&self) -> &[TaskId] {
        &self.ids
    }

    pub fn blocking_join(self) -> Result<Vec<TaskOutput>, TaskError> {
        futures::executor::block_on(self)
    }
}

impl Future for BatchHandle {
    type Output = Result<Vec<TaskOutput>, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.join.as_mut().poll(cx)
    }
}
