use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lumen_core::{catch_panic, SharedClock, SystemClock};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::eviction::Evictor;
use crate::exit::{self, OnExit};
use crate::host::HostScheduler;
use crate::pressure::{CleanupLevel, MemoryPressure, MemoryThresholds};
use crate::probe::{MemoryProbe, ProcessMemoryProbe};

pub type CleanupCallback = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
pub type MemoryWarningListener = Arc<dyn Fn(&MemoryWarning) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Passed to hosts that approximate idle windows with a quiet delay.
    pub idle_delay: Option<Duration>,
    pub thresholds: MemoryThresholds,
    /// Fraction of capacity that Medium and Deep passes shed evictors down to.
    pub shed_watermark: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            idle_delay: Some(Duration::from_secs(5)),
            thresholds: MemoryThresholds::default(),
            shed_watermark: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    ScheduledRunning,
    /// Terminal: registrations and timers are gone and cannot be restarted.
    Disposed,
}

/// Emitted by a scheduled tick that measures `High` or `Critical` pressure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryWarning {
    pub pressure: MemoryPressure,
    pub heap_used_bytes: Option<u64>,
    /// Severity of the pass about to run.
    pub level: CleanupLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub callbacks_run: usize,
    pub callbacks_failed: usize,
    pub instances_evicted: usize,
    pub released_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupStats {
    pub state: CoordinatorState,
    pub registered_count: usize,
    /// Number of cleanup passes run so far (scheduled, idle and manual).
    pub cleanup_count: u64,
    pub last_cleanup_at: Option<Instant>,
    pub last_level: Option<CleanupLevel>,
    pub memory_pressure: MemoryPressure,
}

struct Registration {
    resource: String,
    generation: u64,
    /// `None` for detached registrations, which Light passes never reclaim.
    alive: Option<Box<dyn Fn() -> bool + Send>>,
    callback: CleanupCallback,
}

impl Registration {
    fn resource_gone(&self) -> bool {
        self.alive.as_ref().is_some_and(|alive| !alive())
    }
}

struct AutoRun {
    generation: u64,
    token: CancellationToken,
}

struct State {
    state: CoordinatorState,
    registrations: BTreeMap<String, Registration>,
    next_id: u64,
    next_generation: u64,
    cleanup_count: u64,
    last_cleanup_at: Option<Instant>,
    last_level: Option<CleanupLevel>,
    auto: Option<AutoRun>,
}

struct Inner {
    config: CleanupConfig,
    clock: SharedClock,
    probe: Arc<dyn MemoryProbe>,
    state: Mutex<State>,
    evictors: Mutex<Vec<Arc<dyn Evictor>>>,
    warning_listeners: Mutex<Vec<MemoryWarningListener>>,
    exit_hook: AtomicBool,
}

/// Periodic and idle-time memory reclamation.
///
/// Callbacks always run outside the coordinator's lock; a callback that
/// fails (error or panic) is logged and its registration is gone either way.
#[derive(Clone)]
pub struct CleanupCoordinator {
    inner: Arc<Inner>,
}

impl CleanupCoordinator {
    pub fn new(config: CleanupConfig) -> Self {
        Self::with_parts(config, Arc::new(ProcessMemoryProbe), SystemClock::shared())
    }

    pub fn with_parts(
        config: CleanupConfig,
        probe: Arc<dyn MemoryProbe>,
        clock: SharedClock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                probe,
                state: Mutex::new(State {
                    state: CoordinatorState::Idle,
                    registrations: BTreeMap::new(),
                    next_id: 1,
                    next_generation: 1,
                    cleanup_count: 0,
                    last_cleanup_at: None,
                    last_level: None,
                    auto: None,
                }),
                evictors: Mutex::new(Vec::new()),
                warning_listeners: Mutex::new(Vec::new()),
                exit_hook: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.inner.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.state.lock().state
    }

    /// Tie `callback` to the lifetime of `resource`.
    ///
    /// Only a weak reference is kept: once the last strong owner drops the
    /// resource, the next cleanup pass runs the callback. The callback also
    /// runs on [`shutdown`](Self::shutdown), which the first registration
    /// hooks to process exit (see [`run_exit_hooks`](crate::run_exit_hooks)).
    /// Re-using an `id` replaces the earlier registration without running it.
    pub fn register<T, F>(&self, resource: &Arc<T>, callback: F, id: Option<String>) -> CleanupHandle
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(resource);
        let alive: Box<dyn Fn() -> bool + Send> = Box::new(move || weak.strong_count() > 0);
        self.register_inner(
            std::any::type_name::<T>().to_string(),
            Some(alive),
            Box::new(callback),
            id,
        )
    }

    /// Register a callback that is not tied to any resource. It runs only
    /// through [`cleanup`](Self::cleanup), [`cleanup_all`](Self::cleanup_all)
    /// or shutdown.
    pub fn register_detached<F>(
        &self,
        resource: impl Into<String>,
        callback: F,
        id: Option<String>,
    ) -> CleanupHandle
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.register_inner(resource.into(), None, Box::new(callback), id)
    }

    fn register_inner(
        &self,
        resource: String,
        alive: Option<Box<dyn Fn() -> bool + Send>>,
        callback: CleanupCallback,
        id: Option<String>,
    ) -> CleanupHandle {
        if !self.inner.exit_hook.swap(true, Ordering::SeqCst) {
            let target: Weak<dyn OnExit> = Arc::downgrade(&self.inner) as Weak<Inner>;
            exit::watch(target);
        }

        let mut state = self.inner.state.lock();
        let id = id.unwrap_or_else(|| {
            let id = format!("cleanup-{}", state.next_id);
            state.next_id += 1;
            id
        });
        let generation = state.next_generation;
        state.next_generation += 1;

        if state.state == CoordinatorState::Disposed {
            tracing::warn!(
                target = "lumen.cleanup",
                id = %id,
                resource = %resource,
                "coordinator disposed; dropping cleanup registration"
            );
            return CleanupHandle {
                id,
                generation,
                inner: Weak::new(),
            };
        }

        let previous = state.registrations.insert(
            id.clone(),
            Registration {
                resource,
                generation,
                alive,
                callback,
            },
        );
        if previous.is_some() {
            tracing::debug!(target = "lumen.cleanup", id = %id, "replaced cleanup registration");
        }

        CleanupHandle {
            id,
            generation,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Participate in Medium and Deep passes.
    pub fn register_evictor(&self, evictor: Arc<dyn Evictor>) {
        self.inner.evictors.lock().push(evictor);
    }

    pub fn on_memory_warning(&self, listener: MemoryWarningListener) {
        self.inner.warning_listeners.lock().push(listener);
    }

    /// Start periodic cleanup on `host`. Any previous schedule is replaced.
    ///
    /// Each tick samples memory pressure and runs a pass at the implied
    /// severity. Independently, a Light pass is queued for every idle
    /// window the host reports, re-queued after each one.
    pub fn start_auto_cleanup(
        &self,
        host: Arc<dyn HostScheduler>,
        interval: Duration,
    ) -> AutoCleanupHandle {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.inner.state.lock();
            if state.state == CoordinatorState::Disposed {
                tracing::warn!(
                    target = "lumen.cleanup",
                    "coordinator disposed; auto cleanup not started"
                );
                token.cancel();
                return AutoCleanupHandle {
                    generation: 0,
                    token,
                    inner: Weak::new(),
                };
            }
            if let Some(previous) = state.auto.take() {
                previous.token.cancel();
            }
            let generation = state.next_generation;
            state.next_generation += 1;
            state.auto = Some(AutoRun {
                generation,
                token: token.clone(),
            });
            state.state = CoordinatorState::ScheduledRunning;
            generation
        };

        let weak = Arc::downgrade(&self.inner);
        host.every(interval, token.clone(), {
            let weak = weak.clone();
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    CleanupCoordinator { inner }.scheduled_tick();
                }
            })
        });
        schedule_idle(host, weak.clone(), token.clone());

        tracing::debug!(
            target = "lumen.cleanup",
            interval_ms = interval.as_millis() as u64,
            "auto cleanup started"
        );

        AutoCleanupHandle {
            generation,
            token,
            inner: weak,
        }
    }

    /// Run one registration now. Returns `false` if `id` is unknown.
    pub fn cleanup(&self, id: &str) -> bool {
        let removed = self.inner.state.lock().registrations.remove(id);
        match removed {
            Some(registration) => {
                invoke(id, registration);
                true
            }
            None => false,
        }
    }

    /// Run every registration now.
    pub fn cleanup_all(&self) -> CleanupReport {
        let drained = std::mem::take(&mut self.inner.state.lock().registrations);
        run_registrations(drained)
    }

    /// Run a pass at `level` outside the normal schedule.
    pub fn manual_cleanup(&self, level: CleanupLevel) -> CleanupReport {
        self.run_pass(level)
    }

    /// Current pressure according to the memory probe.
    pub fn memory_pressure(&self) -> MemoryPressure {
        let reading = self.inner.probe.heap_used_bytes();
        self.inner.config.thresholds.level_for_reading(reading)
    }

    pub fn stats(&self) -> CleanupStats {
        let memory_pressure = self.memory_pressure();
        let state = self.inner.state.lock();
        CleanupStats {
            state: state.state,
            registered_count: state.registrations.len(),
            cleanup_count: state.cleanup_count,
            last_cleanup_at: state.last_cleanup_at,
            last_level: state.last_level,
            memory_pressure,
        }
    }

    /// Process-exit hook: run every remaining callback, stop all timers and
    /// enter the terminal `Disposed` state. Idempotent.
    pub fn shutdown(&self) -> CleanupReport {
        self.inner.shutdown()
    }

    fn scheduled_tick(&self) {
        let reading = self.inner.probe.heap_used_bytes();
        let pressure = self.inner.config.thresholds.level_for_reading(reading);
        let level = CleanupLevel::for_pressure(pressure);

        if pressure >= MemoryPressure::High {
            let warning = MemoryWarning {
                pressure,
                heap_used_bytes: reading,
                level,
            };
            tracing::warn!(
                target = "lumen.cleanup",
                ?pressure,
                heap_used_bytes = ?reading,
                "memory pressure warning"
            );
            let listeners = self.inner.warning_listeners.lock().clone();
            for listener in listeners {
                if let Err(panic) = catch_panic(|| listener(&warning)) {
                    tracing::error!(
                        target = "lumen.cleanup",
                        panic = %panic,
                        "memory warning listener panicked"
                    );
                }
            }
        }

        self.run_pass(level);
    }

    fn run_pass(&self, level: CleanupLevel) -> CleanupReport {
        let reclaimable = {
            let mut state = self.inner.state.lock();
            if state.state == CoordinatorState::Disposed {
                return CleanupReport::default();
            }
            let gone: Vec<String> = state
                .registrations
                .iter()
                .filter(|(_, registration)| registration.resource_gone())
                .map(|(id, _)| id.clone())
                .collect();
            let mut reclaimable = BTreeMap::new();
            for id in gone {
                if let Some(registration) = state.registrations.remove(&id) {
                    reclaimable.insert(id, registration);
                }
            }
            reclaimable
        };

        let mut report = run_registrations(reclaimable);

        if level >= CleanupLevel::Medium {
            let evictors = self.inner.evictors.lock().clone();
            for evictor in evictors {
                let watermark = self.inner.config.shed_watermark;
                match catch_panic(|| evictor.evict_to_ratio(watermark)) {
                    Ok(evicted) => report.instances_evicted += evicted,
                    Err(panic) => tracing::error!(
                        target = "lumen.cleanup",
                        evictor = evictor.name(),
                        panic = %panic,
                        "evictor panicked"
                    ),
                }
            }
        }

        if level == CleanupLevel::Deep {
            report.released_memory = self.inner.probe.release_free_memory();
        }

        let now = self.inner.clock.now();
        {
            let mut state = self.inner.state.lock();
            state.cleanup_count += 1;
            state.last_cleanup_at = Some(now);
            state.last_level = Some(level);
        }

        tracing::debug!(
            target = "lumen.cleanup",
            ?level,
            callbacks_run = report.callbacks_run,
            callbacks_failed = report.callbacks_failed,
            instances_evicted = report.instances_evicted,
            released_memory = report.released_memory,
            "cleanup pass finished"
        );
        report
    }
}

/// Cancels a registration without running it.
#[derive(Debug)]
pub struct CleanupHandle {
    id: String,
    generation: u64,
    inner: Weak<Inner>,
}

impl CleanupHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `false` if the registration already ran, was cancelled or was replaced.
    pub fn cancel(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut state = inner.state.lock();
        let matches = state
            .registrations
            .get(&self.id)
            .is_some_and(|registration| registration.generation == self.generation);
        if matches {
            state.registrations.remove(&self.id);
        }
        matches
    }
}

/// Stops the schedule started by [`CleanupCoordinator::start_auto_cleanup`].
#[derive(Debug)]
pub struct AutoCleanupHandle {
    generation: u64,
    token: CancellationToken,
    inner: Weak<Inner>,
}

impl AutoCleanupHandle {
    pub fn stop(&self) {
        self.token.cancel();
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        let current = state
            .auto
            .as_ref()
            .is_some_and(|auto| auto.generation == self.generation);
        if current {
            state.auto = None;
            if state.state == CoordinatorState::ScheduledRunning {
                state.state = CoordinatorState::Idle;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

fn schedule_idle(host: Arc<dyn HostScheduler>, weak: Weak<Inner>, token: CancellationToken) {
    if token.is_cancelled() {
        return;
    }
    let next_host = Arc::clone(&host);
    let next_token = token.clone();
    let supported = host.on_idle(Box::new(move || {
        if next_token.is_cancelled() {
            return;
        }
        let Some(inner) = weak.upgrade() else {
            return;
        };
        CleanupCoordinator { inner }.run_pass(CleanupLevel::Light);
        schedule_idle(next_host, weak, next_token);
    }));
    if !supported {
        tracing::debug!(
            target = "lumen.cleanup",
            "host has no idle facility; relying on the periodic timer"
        );
    }
}

fn run_registrations(registrations: BTreeMap<String, Registration>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for (id, registration) in registrations {
        report.callbacks_run += 1;
        if !invoke(&id, registration) {
            report.callbacks_failed += 1;
        }
    }
    report
}

fn invoke(id: &str, registration: Registration) -> bool {
    let Registration {
        resource, callback, ..
    } = registration;
    match catch_panic(callback) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(
                target = "lumen.cleanup",
                id = %id,
                resource = %resource,
                error = %err,
                "cleanup callback failed"
            );
            false
        }
        Err(panic) => {
            tracing::error!(
                target = "lumen.cleanup",
                id = %id,
                resource = %resource,
                panic = %panic,
                "cleanup callback panicked"
            );
            false
        }
    }
}

impl Inner {
    fn shutdown(&self) -> CleanupReport {
        let drained = {
            let mut state = self.state.lock();
            if state.state == CoordinatorState::Disposed {
                return CleanupReport::default();
            }
            if let Some(auto) = state.auto.take() {
                auto.token.cancel();
            }
            state.state = CoordinatorState::Disposed;
            std::mem::take(&mut state.registrations)
        };
        self.evictors.lock().clear();
        let report = run_registrations(drained);
        tracing::debug!(
            target = "lumen.cleanup",
            callbacks_run = report.callbacks_run,
            callbacks_failed = report.callbacks_failed,
            "cleanup coordinator disposed"
        );
        report
    }
}

impl OnExit for Inner {
    fn on_exit(&self) {
        self.shutdown();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(auto) = state.auto.take() {
            auto.token.cancel();
        }
        if state.state == CoordinatorState::Disposed {
            return;
        }
        state.state = CoordinatorState::Disposed;
        let drained = std::mem::take(&mut state.registrations);
        if !drained.is_empty() {
            run_registrations(drained);
        }
    }
}
