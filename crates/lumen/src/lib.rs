//! Resource lifecycle runtime for charts.
//!
//! [`ChartRuntime`] composes the three lumen components from one
//! [`LumenConfig`]:
//!
//! - an [`InstanceRegistry`] that bounds the number of live chart instances,
//! - a [`CleanupCoordinator`] that reclaims memory on a schedule and sheds the
//!   registry under pressure,
//! - a [`TaskPool`] that reduces large datasets off the calling thread.
//!
//! ```no_run
//! use lumen::{ChartRuntime, LumenConfig, Payload, SampleMethod, SampleOptions, TaskKind};
//!
//! let runtime = ChartRuntime::new(LumenConfig::default());
//! runtime.start()?;
//! let sampled = runtime
//!     .tasks()
//!     .submit(
//!         TaskKind::Sample(SampleOptions::count(SampleMethod::Lttb, 500)),
//!         Payload::numbers((0..100_000).map(|i| (i as f64).sin())),
//!     )
//!     .blocking_join();
//! # drop(sampled);
//! runtime.shutdown();
//! # Ok::<(), std::io::Error>(())
//! ```

mod runtime;

pub use lumen_config::{init_tracing, ConfigError, LoggingConfig, LumenConfig};
pub use lumen_memory::{
    run_exit_hooks, CleanupCoordinator, CleanupLevel, CleanupReport, Disposable, EvictionEvent,
    EvictionReason, HostScheduler, InstanceRegistry, ManualHost, MemoryPressure, MemoryProbe,
    MemoryWarning, StaticMemoryProbe, TokioHost,
};
pub use lumen_scheduler::{
    Payload, SampleMethod, SampleOptions, TaskError, TaskHandle, TaskKind, TaskOutput, TaskPool,
};
pub use runtime::{ChartRegistry, ChartRuntime};
