use serde::{Deserialize, Serialize};

pub const MB: u64 = 1024 * 1024;

/// Coarse-grained memory pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Severity of a cleanup pass. Each level includes the work of the levels below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupLevel {
    /// Reclaim registrations whose backing resource is already gone.
    Light,
    /// Light, plus shed registered evictors down to the configured watermark.
    Medium,
    /// Medium, plus ask the allocator to hand free pages back to the OS.
    Deep,
}

impl CleanupLevel {
    pub fn for_pressure(pressure: MemoryPressure) -> Self {
        match pressure {
            MemoryPressure::Critical => CleanupLevel::Deep,
            MemoryPressure::High => CleanupLevel::Medium,
            MemoryPressure::Medium | MemoryPressure::Low => CleanupLevel::Light,
        }
    }
}

/// Absolute heap-usage thresholds, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryThresholds {
    pub low_mb: u64,
    pub medium_mb: u64,
    pub high_mb: u64,
    pub critical_mb: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            low_mb: 50,
            medium_mb: 80,
            high_mb: 100,
            critical_mb: 120,
        }
    }
}

impl MemoryThresholds {
    /// Classify a heap reading. Usage below `medium_mb` (including below
    /// `low_mb`) reports `Low`.
    pub fn level_for_bytes(self, used_bytes: u64) -> MemoryPressure {
        let used_mb = used_bytes as f64 / MB as f64;
        if used_mb >= self.critical_mb as f64 {
            MemoryPressure::Critical
        } else if used_mb >= self.high_mb as f64 {
            MemoryPressure::High
        } else if used_mb >= self.medium_mb as f64 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    /// `None` means the host exposes no usage figure.
    pub fn level_for_reading(self, used_bytes: Option<u64>) -> MemoryPressure {
        used_bytes
            .map(|bytes| self.level_for_bytes(bytes))
            .unwrap_or(MemoryPressure::Low)
    }

    pub fn is_monotonic(self) -> bool {
        self.low_mb <= self.medium_mb
            && self.medium_mb <= self.high_mb
            && self.high_mb <= self.critical_mb
    }
}
