use crate::error::ReduceError;
use crate::reduce::{self, Payload, TaskKind, TaskOutput};

/// The work a pool worker performs for one task.
///
/// The pool treats a panic inside `execute` as a worker failure for that
/// task only.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError>;
}

/// Runs the built-in dataset reduction algorithms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceExecutor;

impl TaskExecutor for ReduceExecutor {
    fn execute(&self, kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError> {
        reduce::run(kind, payload)
    }
}
