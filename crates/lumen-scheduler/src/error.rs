use std::time::Duration;

/// A payload or option set that the requested algorithm cannot process.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReduceError {
    #[error("{kind} expects a value sequence, got run-length runs")]
    UnexpectedRuns { kind: &'static str },

    #[error("run {index} is malformed: {message}")]
    InvalidRun { index: usize, message: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// Outcome of a task that did not produce a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("task was cancelled before it started")]
    Cancelled,

    #[error("task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("task pool was terminated")]
    Terminated,

    #[error("worker failed: {0}")]
    WorkerFailure(String),

    #[error(transparent)]
    InvalidTask(#[from] ReduceError),
}
