use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::process;

/// Host memory introspection.
///
/// Implementations must be cheap enough to call on every cleanup tick.
pub trait MemoryProbe: Send + Sync {
    /// Current heap usage in bytes, or `None` if the host does not expose it.
    fn heap_used_bytes(&self) -> Option<u64>;

    /// Request that the host reclaim unused memory (the closest analogue to a
    /// full collection pass). Returns whether anything was done.
    fn release_free_memory(&self) -> bool {
        false
    }
}

/// Samples the current process' resident set size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn heap_used_bytes(&self) -> Option<u64> {
        process::current_rss_bytes()
    }

    fn release_free_memory(&self) -> bool {
        process::release_free_memory()
    }
}

/// A probe for hosts without any memory introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMemoryProbe;

impl MemoryProbe for NoopMemoryProbe {
    fn heap_used_bytes(&self) -> Option<u64> {
        None
    }
}

/// A probe whose reading is set explicitly, e.g. by an embedder that tracks
/// its own budget.
#[derive(Debug, Clone, Default)]
pub struct StaticMemoryProbe {
    bytes: Arc<AtomicU64>,
    known: Arc<AtomicBool>,
    releases: Arc<AtomicU64>,
}

impl StaticMemoryProbe {
    pub fn new(bytes: u64) -> Self {
        let probe = Self::default();
        probe.set_bytes(bytes);
        probe
    }

    pub fn set_bytes(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Relaxed);
        self.known.store(true, Ordering::Relaxed);
    }

    /// Forget the reading; subsequent samples report `None`.
    pub fn clear(&self) {
        self.known.store(false, Ordering::Relaxed);
    }

    /// Number of times a Deep pass asked this probe to release memory.
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn heap_used_bytes(&self) -> Option<u64> {
        self.known
            .load(Ordering::Relaxed)
            .then(|| self.bytes.load(Ordering::Relaxed))
    }

    fn release_free_memory(&self) -> bool {
        self.releases.fetch_add(1, Ordering::Relaxed);
        true
    }
}
