use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

pub type TickFn = Arc<dyn Fn() + Send + Sync>;
pub type IdleFn = Box<dyn FnOnce() + Send>;

/// Timer and idle-time facilities provided by the host.
pub trait HostScheduler: Send + Sync {
    /// Invoke `tick` every `interval` until `token` is cancelled. The first
    /// tick fires one interval after the call.
    fn every(&self, interval: Duration, token: CancellationToken, tick: TickFn);

    /// Run `callback` once, during the next idle window.
    ///
    /// Returns `false` when the host cannot detect idle time; the callback is
    /// dropped without running.
    fn on_idle(&self, callback: IdleFn) -> bool;
}

/// Host scheduler backed by a Tokio runtime.
///
/// Tokio has no notion of an idle window, so an idle callback simply runs
/// `idle_delay` after it was queued, busy or not. The coordinator re-queues
/// its idle pass after each run, so on this host the idle pass is a second
/// fixed-rate Light pass with period `idle_delay`. Embedders that can observe
/// real idleness should implement [`HostScheduler`] on their event loop
/// instead, or pass `None` to keep only the periodic timer. Callbacks run on
/// the blocking pool so a slow disposer never stalls the timer.
pub struct TokioHost {
    runtime: Option<Runtime>,
    handle: tokio::runtime::Handle,
    idle_delay: Option<Duration>,
}

impl TokioHost {
    /// Build a host with its own single-threaded timer runtime.
    pub fn new(idle_delay: Option<Duration>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(2)
            .enable_time()
            .thread_name("lumen-host")
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            idle_delay,
        })
    }

    /// Reuse an existing runtime (e.g. inside a `#[tokio::main]` binary).
    pub fn with_handle(handle: tokio::runtime::Handle, idle_delay: Option<Duration>) -> Self {
        Self {
            runtime: None,
            handle,
            idle_delay,
        }
    }
}

impl HostScheduler for TokioHost {
    fn every(&self, interval: Duration, token: CancellationToken, tick: TickFn) {
        let interval = interval.max(Duration::from_millis(1));
        self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let tick = Arc::clone(&tick);
                        if let Err(err) = tokio::task::spawn_blocking(move || tick()).await {
                            tracing::error!(
                                target = "lumen.cleanup",
                                error = %err,
                                "scheduled tick failed"
                            );
                        }
                    }
                }
            }
        });
    }

    fn on_idle(&self, callback: IdleFn) -> bool {
        let Some(delay) = self.idle_delay else {
            return false;
        };
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = tokio::task::spawn_blocking(callback).await {
                tracing::error!(target = "lumen.cleanup", error = %err, "idle callback failed");
            }
        });
        true
    }
}

impl Drop for TokioHost {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct ManualTimer {
    interval: Duration,
    token: CancellationToken,
    tick: TickFn,
}

/// A host scheduler driven explicitly by the caller.
///
/// Used by tests and by embedders that own their event loop: call
/// [`ManualHost::tick`] from the loop's timer and [`ManualHost::run_idle`]
/// when it has nothing else to do.
#[derive(Clone)]
pub struct ManualHost {
    idle_supported: bool,
    timers: Arc<Mutex<Vec<ManualTimer>>>,
    idle: Arc<Mutex<Vec<IdleFn>>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self {
            idle_supported: true,
            timers: Arc::new(Mutex::new(Vec::new())),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A host that reports no idle-time facility.
    pub fn without_idle() -> Self {
        Self {
            idle_supported: false,
            ..Self::new()
        }
    }

    /// Fire every live timer once. Returns the number of timers fired.
    pub fn tick(&self) -> usize {
        let ticks: Vec<TickFn> = {
            let mut timers = self.timers.lock();
            timers.retain(|timer| !timer.token.is_cancelled());
            timers.iter().map(|timer| Arc::clone(&timer.tick)).collect()
        };
        for tick in &ticks {
            tick();
        }
        ticks.len()
    }

    /// Run the idle callbacks queued so far. Callbacks queued while running
    /// wait for the next call. Returns the number of callbacks run.
    pub fn run_idle(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.idle.lock());
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    pub fn active_timers(&self) -> usize {
        let mut timers = self.timers.lock();
        timers.retain(|timer| !timer.token.is_cancelled());
        timers.len()
    }

    pub fn timer_intervals(&self) -> Vec<Duration> {
        self.timers
            .lock()
            .iter()
            .filter(|timer| !timer.token.is_cancelled())
            .map(|timer| timer.interval)
            .collect()
    }

    pub fn pending_idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostScheduler for ManualHost {
    fn every(&self, interval: Duration, token: CancellationToken, tick: TickFn) {
        self.timers.lock().push(ManualTimer {
            interval,
            token,
            tick,
        });
    }

    fn on_idle(&self, callback: IdleFn) -> bool {
        if !self.idle_supported {
            return false;
        }
        self.idle.lock().push(callback);
        true
    }
}
