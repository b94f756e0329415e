use std::sync::{Arc, OnceLock};

use lumen_config::LumenConfig;
use lumen_core::SystemClock;
use lumen_memory::{
    AutoCleanupHandle, CleanupCoordinator, CleanupReport, Disposable, HostScheduler,
    InstanceRegistry, MemoryProbe, ProcessMemoryProbe, TokioHost,
};
use lumen_scheduler::TaskPool;
use parking_lot::Mutex;

const GLOBAL_TEARDOWN_ID: &str = "lumen.runtime.teardown";

/// Registry of live charts, each owned through its disposal handle.
pub type ChartRegistry = InstanceRegistry<Arc<dyn Disposable>>;

#[derive(Default)]
struct Schedule {
    auto: Option<AutoCleanupHandle>,
    /// Kept alive for as long as the schedule runs on it.
    host: Option<Arc<TokioHost>>,
}

/// The composition root: one registry, one cleanup coordinator and one task
/// pool built from a single configuration.
///
/// The registry is installed as the coordinator's eviction target, so Medium
/// and Deep cleanup passes shed registered charts. The task pool stays
/// independent of both.
pub struct ChartRuntime {
    config: LumenConfig,
    registry: ChartRegistry,
    cleanup: CleanupCoordinator,
    tasks: TaskPool,
    schedule: Mutex<Schedule>,
}

impl ChartRuntime {
    pub fn new(config: LumenConfig) -> Self {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe))
    }

    pub fn with_probe(config: LumenConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let registry = ChartRegistry::new(config.registry_config());
        let cleanup =
            CleanupCoordinator::with_parts(config.cleanup_config(), probe, SystemClock::shared());
        cleanup.register_evictor(Arc::new(registry.clone()));
        let tasks = TaskPool::new(config.pool_config());

        Self {
            config,
            registry,
            cleanup,
            tasks,
            schedule: Mutex::new(Schedule::default()),
        }
    }

    /// The process-wide runtime, built from [`LumenConfig::default`] on first use.
    ///
    /// A static is never dropped, so its teardown is registered with the
    /// cleanup coordinator and runs from the process-exit hook: every chart is
    /// disposed and the task pool terminated.
    pub fn global() -> &'static ChartRuntime {
        static GLOBAL: OnceLock<ChartRuntime> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let runtime = ChartRuntime::new(LumenConfig::default());
            runtime.install_teardown();
            runtime
        })
    }

    fn install_teardown(&self) {
        let registry = self.registry.clone();
        let tasks = self.tasks.clone();
        self.cleanup.register_detached(
            "chart-runtime",
            move || {
                registry.dispose_all();
                tasks.terminate();
                Ok(())
            },
            Some(GLOBAL_TEARDOWN_ID.to_string()),
        );
    }

    pub fn config(&self) -> &LumenConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChartRegistry {
        &self.registry
    }

    pub fn cleanup(&self) -> &CleanupCoordinator {
        &self.cleanup
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    /// Start automatic cleanup on a dedicated Tokio timer thread.
    pub fn start(&self) -> std::io::Result<()> {
        let host = Arc::new(TokioHost::new(self.cleanup.config().idle_delay)?);
        let auto = self
            .cleanup
            .start_auto_cleanup(host.clone(), self.cleanup.config().interval);
        let previous = std::mem::replace(
            &mut *self.schedule.lock(),
            Schedule {
                auto: Some(auto),
                host: Some(host),
            },
        );
        drop(previous);
        tracing::debug!(target = "lumen.runtime", "automatic cleanup started");
        Ok(())
    }

    /// Start automatic cleanup on a caller-provided host (an embedder's event
    /// loop or a [`lumen_memory::ManualHost`]).
    pub fn start_with_host(&self, host: Arc<dyn HostScheduler>) {
        let auto = self
            .cleanup
            .start_auto_cleanup(host, self.cleanup.config().interval);
        let previous = std::mem::replace(
            &mut *self.schedule.lock(),
            Schedule {
                auto: Some(auto),
                host: None,
            },
        );
        drop(previous);
    }

    /// Dispose every chart, run every cleanup callback and terminate the
    /// task pool. The coordinator cannot be restarted afterwards.
    pub fn shutdown(&self) -> CleanupReport {
        let schedule = std::mem::take(&mut *self.schedule.lock());
        if let Some(auto) = &schedule.auto {
            auto.stop();
        }

        self.registry.dispose_all();
        let report = self.cleanup.shutdown();
        self.tasks.terminate();
        drop(schedule);

        tracing::info!(
            target = "lumen.runtime",
            callbacks_run = report.callbacks_run,
            callbacks_failed = report.callbacks_failed,
            "chart runtime shut down"
        );
        report
    }

    /// Wait for Ctrl-C, then [`shutdown`](Self::shutdown).
    pub async fn shutdown_on_ctrl_c(&self) -> std::io::Result<CleanupReport> {
        tokio::signal::ctrl_c().await?;
        tracing::info!(target = "lumen.runtime", "interrupt received; shutting down");
        Ok(self.shutdown())
    }
}

impl Drop for ChartRuntime {
    fn drop(&mut self) {
        if let Some(auto) = self.schedule.get_mut().auto.take() {
            auto.stop();
        }
    }
}
