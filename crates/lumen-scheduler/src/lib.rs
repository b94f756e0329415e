//! Off-thread dataset reduction for charts.
//!
//! [`TaskPool`] runs the algorithms in [`reduce`] on a fixed set of worker
//! threads with bounded per-worker queues and a per-task deadline. When
//! worker threads cannot be created the same algorithms run synchronously on
//! the caller, so results never depend on worker availability.

mod error;
mod executor;
mod pool;
pub mod reduce;
mod task;

pub use error::{ReduceError, TaskError};
pub use executor::{ReduceExecutor, TaskExecutor};
pub use pool::{PoolConfig, PoolMode, PoolStats, TaskPool};
pub use reduce::{
    Aggregate, DownsampleMethod, DownsampleOptions, Payload, Run, SampleMethod, SampleOptions,
    SampleTarget, TaskKind, TaskOutput, TransformOptions,
};
pub use task::{BatchHandle, TaskHandle, TaskId};
