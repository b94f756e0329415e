use std::sync::{Once, Weak};

use lumen_core::catch_panic;
use parking_lot::Mutex;

/// Something to tear down when the process exits.
pub(crate) trait OnExit: Send + Sync {
    fn on_exit(&self);
}

static WATCHED: Mutex<Vec<Weak<dyn OnExit>>> = parking_lot::const_mutex(Vec::new());
static INSTALL: Once = Once::new();

/// Run `target` from the process-exit hook, installing the hook on first use.
pub(crate) fn watch(target: Weak<dyn OnExit>) {
    INSTALL.call_once(install);
    let mut watched = WATCHED.lock();
    watched.retain(|entry| entry.strong_count() > 0);
    watched.push(target);
}

/// Shut down every cleanup coordinator that has registrations and is still
/// alive. Returns the number of coordinators shut down.
///
/// Runs automatically when the process exits through `exit` or a return from
/// `main`. Embedders with their own teardown path (a signal handler, a host
/// shutdown event) may call it directly; later calls only see coordinators
/// that registered since.
pub fn run_exit_hooks() -> usize {
    let watched = std::mem::take(&mut *WATCHED.lock());
    let mut shut_down = 0;
    for target in watched {
        let Some(target) = target.upgrade() else {
            continue;
        };
        shut_down += 1;
        if let Err(panic) = catch_panic(|| target.on_exit()) {
            tracing::error!(target = "lumen.cleanup", panic = %panic, "exit hook panicked");
        }
    }
    shut_down
}

extern "C" fn at_exit() {
    run_exit_hooks();
}

fn install() {
    // SAFETY: `at_exit` is a plain `extern "C"` function that never unwinds.
    let status = unsafe { libc::atexit(at_exit) };
    if status != 0 {
        tracing::warn!(
            target = "lumen.cleanup",
            status,
            "failed to install process-exit hook; call run_exit_hooks on shutdown"
        );
    }
}
