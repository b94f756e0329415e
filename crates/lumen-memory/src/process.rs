/// Resident set size of the current process, when the platform exposes it.
pub(crate) fn current_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(err) => {
                // `/proc` is missing in some sandboxes; only unexpected errors are worth a log line.
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(
                        target = "lumen.memory",
                        error = %err,
                        "failed to read /proc/self/status while sampling rss"
                    );
                }
                return None;
            }
        };
        parse_vm_rss(&status)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = sysinfo::System::new();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    for line in status.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("VmRSS:") else {
            continue;
        };
        let kb = rest.split_whitespace().next()?;
        return match kb.parse::<u64>() {
            Ok(kb) => Some(kb.saturating_mul(1024)),
            Err(err) => {
                // Log once; this is sampled on every cleanup tick.
                static REPORTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
                if REPORTED.set(()).is_ok() {
                    tracing::debug!(
                        target = "lumen.memory",
                        value = kb,
                        error = %err,
                        "failed to parse VmRSS from /proc/self/status"
                    );
                }
                None
            }
        };
    }
    None
}

/// Ask the allocator to return free heap pages to the OS.
///
/// Returns `true` when the allocator reported that memory was released.
pub(crate) fn release_free_memory() -> bool {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: `malloc_trim` has no preconditions; a pad of 0 trims as much as possible.
        unsafe { libc::malloc_trim(0) != 0 }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        false
    }
}
