use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A component that can shed load when asked by the cleanup coordinator.
pub trait Evictor: Send + Sync {
    fn name(&self) -> &str;

    /// Shrink to `ratio` of capacity. Returns the number of evicted entries.
    fn evict_to_ratio(&self, ratio: f64) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Made room for a new registration.
    Capacity,
    /// Shed by a cleanup pass or a lowered instance cap.
    Shed,
    /// Overwritten by a registration under the same id.
    Replaced,
}

/// Notification delivered after an instance has been evicted and disposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionEvent {
    pub id: String,
    pub reason: EvictionReason,
}

pub type EvictionListener = Arc<dyn Fn(&EvictionEvent) + Send + Sync>;
