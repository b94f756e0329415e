//! Lifecycle management for live chart instances.
//!
//! Two collaborators live here:
//! - [`InstanceRegistry`] keeps a bounded set of chart handles and evicts
//!   under a priority-weighted LRU policy.
//! - [`CleanupCoordinator`] runs disposal callbacks on a schedule, at a
//!   severity derived from measured memory pressure, and asks registered
//!   [`Evictor`]s (typically the registry) to shed load.
//!
//! Both are explicit objects. The only process-wide state is the list of
//! coordinators that [`run_exit_hooks`] shuts down when the process exits.
//! All host facilities (timers, idle windows, memory introspection) are
//! injected through [`HostScheduler`] and [`MemoryProbe`] and degrade to
//! "low pressure, fixed timer" when unavailable.

mod cleanup;
mod eviction;
mod exit;
mod host;
mod pressure;
mod probe;
mod process;
mod registry;

pub use cleanup::{
    AutoCleanupHandle, CleanupCallback, CleanupConfig, CleanupCoordinator, CleanupHandle,
    CleanupReport, CleanupStats, CoordinatorState, MemoryWarning, MemoryWarningListener,
};
pub use eviction::{EvictionEvent, EvictionListener, EvictionReason, Evictor};
pub use exit::run_exit_hooks;
pub use host::{HostScheduler, IdleFn, ManualHost, TickFn, TokioHost};
pub use pressure::{CleanupLevel, MemoryPressure, MemoryThresholds, MB};
pub use probe::{MemoryProbe, NoopMemoryProbe, ProcessMemoryProbe, StaticMemoryProbe};
pub use registry::{
    Disposable, InstanceRegistry, RegistryConfig, RegistryStats, DEFAULT_PRIORITY, MAX_PRIORITY,
};
