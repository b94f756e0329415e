use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumen_core::{catch_panic, SharedClock, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::eviction::{EvictionEvent, EvictionListener, EvictionReason, Evictor};

pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

/// The owning side of a registered chart instance.
///
/// The registry never inspects a handle beyond calling `dispose`, which may
/// run more than once across independent owners and must tolerate resources
/// that are already gone.
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
    fn dispose(&self) -> anyhow::Result<()> {
        (**self).dispose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_instances: usize,
    /// Records with `priority >= eviction_exempt_priority` are never evicted automatically.
    pub eviction_exempt_priority: u8,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_instances: 50,
            eviction_exempt_priority: 8,
        }
    }
}

/// Snapshot returned by [`InstanceRegistry::stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    /// Sorted for stable output.
    pub ids: Vec<String>,
    pub max_instances: usize,
    pub total_memory_estimate: u64,
    pub average_access_count: f64,
    /// Time since the longest-lived record was registered.
    pub oldest_age: Duration,
}

struct InstanceRecord<H> {
    handle: H,
    created_at: Instant,
    last_access_at: Instant,
    /// Value of the registry's touch counter at the last register or get.
    /// Orders accesses that share a clock reading.
    last_touch: u64,
    access_count: u64,
    priority: u8,
    memory_estimate_bytes: u64,
    /// Insertion order.
    seq: u64,
}

struct State<H> {
    records: HashMap<String, InstanceRecord<H>>,
    max_instances: usize,
    next_seq: u64,
    next_touch: u64,
}

struct Inner<H> {
    exempt_priority: u8,
    clock: SharedClock,
    state: Mutex<State<H>>,
    listeners: Mutex<Vec<EvictionListener>>,
}

/// Bounded registry of live chart instances with priority-weighted LRU eviction.
///
/// Every mutation is serialized through a single mutex. Disposal runs after
/// the lock is released so a handle's `dispose` may call back into the registry.
pub struct InstanceRegistry<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for InstanceRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Disposable> InstanceRegistry<H> {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: RegistryConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                exempt_priority: config.eviction_exempt_priority.min(MAX_PRIORITY + 1),
                clock,
                state: Mutex::new(State {
                    records: HashMap::new(),
                    max_instances: config.max_instances,
                    next_seq: 0,
                    next_touch: 0,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to eviction notifications.
    pub fn subscribe(&self, listener: EvictionListener) {
        self.inner.listeners.lock().push(listener);
    }

    /// Register `handle` under `id`.
    ///
    /// At capacity, LRU victims are evicted first. When every record is
    /// exempt the insert still proceeds and the registry runs over capacity
    /// until an evictable slot appears. Re-registering an `id` disposes the
    /// previous handle.
    pub fn register(&self, id: impl Into<String>, handle: H, priority: i32) {
        let id = id.into();
        let priority = clamp_priority(priority);
        let now = self.inner.clock.now();

        let mut disposals = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if let Some(previous) = state.records.remove(&id) {
                disposals.push((id.clone(), previous.handle, Some(EvictionReason::Replaced)));
            }

            while state.records.len() >= state.max_instances {
                let Some(victim) = select_victim(&state, now, self.inner.exempt_priority) else {
                    tracing::warn!(
                        target = "lumen.registry",
                        id = %id,
                        total = state.records.len(),
                        max_instances = state.max_instances,
                        "no evictable instance; registering over capacity"
                    );
                    break;
                };
                if let Some(record) = state.records.remove(&victim) {
                    disposals.push((victim, record.handle, Some(EvictionReason::Capacity)));
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let last_touch = state.touch();
            state.records.insert(
                id,
                InstanceRecord {
                    handle,
                    created_at: now,
                    last_access_at: now,
                    last_touch,
                    access_count: 0,
                    priority,
                    memory_estimate_bytes: 0,
                    seq,
                },
            );
        }

        self.finish_disposals(disposals);
    }

    /// Look up a handle, recording the access.
    pub fn get(&self, id: &str) -> Option<H>
    where
        H: Clone,
    {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let touch = state.touch();
        let record = state.records.get_mut(id)?;
        record.last_access_at = now;
        record.last_touch = touch;
        record.access_count = record.access_count.saturating_add(1);
        Some(record.handle.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.state.lock().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose and remove `id`. Returns `false` (and does nothing) if it is not registered.
    pub fn dispose(&self, id: &str) -> bool {
        let removed = self.inner.state.lock().records.remove(id);
        match removed {
            Some(record) => {
                self.finish_disposals(vec![(id.to_string(), record.handle, None)]);
                true
            }
            None => false,
        }
    }

    pub fn dispose_all(&self) {
        let mut drained: Vec<_> = self.inner.state.lock().records.drain().collect();
        drained.sort_by_key(|(_, record)| record.seq);
        let disposals = drained
            .into_iter()
            .map(|(id, record)| (id, record.handle, None))
            .collect();
        self.finish_disposals(disposals);
    }

    /// Returns `false` if `id` is not registered.
    pub fn set_priority(&self, id: &str, priority: i32) -> bool {
        let mut state = self.inner.state.lock();
        match state.records.get_mut(id) {
            Some(record) => {
                record.priority = clamp_priority(priority);
                true
            }
            None => false,
        }
    }

    /// Returns `false` if `id` is not registered.
    pub fn update_memory_estimate(&self, id: &str, bytes: u64) -> bool {
        let mut state = self.inner.state.lock();
        match state.records.get_mut(id) {
            Some(record) => {
                record.memory_estimate_bytes = bytes;
                true
            }
            None => false,
        }
    }

    /// Change the cap, evicting down to it if needed.
    ///
    /// Eviction stops early once only exempt records remain.
    pub fn set_max_instances(&self, max_instances: usize) {
        let disposals = {
            let mut state = self.inner.state.lock();
            state.max_instances = max_instances;
            self.collect_victims(&mut state, max_instances)
        };
        self.finish_disposals(disposals);
    }

    /// Evict by the LRU policy until at most `target` records remain or no
    /// candidate is left. Returns the number of evicted records.
    pub fn shed_to(&self, target: usize) -> usize {
        let disposals = {
            let mut state = self.inner.state.lock();
            self.collect_victims(&mut state, target)
        };
        let evicted = disposals.len();
        self.finish_disposals(disposals);
        evicted
    }

    pub fn max_instances(&self) -> usize {
        self.inner.state.lock().max_instances
    }

    pub fn stats(&self) -> RegistryStats {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        let total = state.records.len();
        let mut ids: Vec<String> = state.records.keys().cloned().collect();
        ids.sort();
        let total_memory_estimate = state
            .records
            .values()
            .fold(0u64, |acc, record| acc.saturating_add(record.memory_estimate_bytes));
        let total_accesses: u64 = state.records.values().map(|record| record.access_count).sum();
        let average_access_count = if total == 0 {
            0.0
        } else {
            total_accesses as f64 / total as f64
        };
        let oldest_age = state
            .records
            .values()
            .map(|record| now.saturating_duration_since(record.created_at))
            .max()
            .unwrap_or_default();

        RegistryStats {
            total,
            ids,
            max_instances: state.max_instances,
            total_memory_estimate,
            average_access_count,
            oldest_age,
        }
    }

    fn collect_victims(
        &self,
        state: &mut State<H>,
        target: usize,
    ) -> Vec<(String, H, Option<EvictionReason>)> {
        let now = self.inner.clock.now();
        let mut disposals = Vec::new();
        while state.records.len() > target {
            let Some(victim) = select_victim(state, now, self.inner.exempt_priority) else {
                break;
            };
            if let Some(record) = state.records.remove(&victim) {
                disposals.push((victim, record.handle, Some(EvictionReason::Shed)));
            }
        }
        disposals
    }

    fn finish_disposals(&self, disposals: Vec<(String, H, Option<EvictionReason>)>) {
        if disposals.is_empty() {
            return;
        }

        let mut events = Vec::new();
        for (id, handle, reason) in disposals {
            dispose_handle(&id, &handle);
            if let Some(reason) = reason {
                tracing::debug!(target = "lumen.registry", id = %id, ?reason, "evicted instance");
                events.push(EvictionEvent { id, reason });
            }
        }

        if events.is_empty() {
            return;
        }
        let listeners = self.inner.listeners.lock().clone();
        for event in &events {
            for listener in &listeners {
                if let Err(panic) = catch_panic(|| listener(event)) {
                    tracing::error!(
                        target = "lumen.registry",
                        id = %event.id,
                        panic = %panic,
                        "eviction listener panicked"
                    );
                }
            }
        }
    }
}

impl<H> State<H> {
    fn touch(&mut self) -> u64 {
        let touch = self.next_touch;
        self.next_touch += 1;
        touch
    }
}

impl<H: Disposable> Evictor for InstanceRegistry<H> {
    fn name(&self) -> &str {
        "instance_registry"
    }

    fn evict_to_ratio(&self, ratio: f64) -> usize {
        let ratio = ratio.clamp(0.0, 1.0);
        let target = (self.max_instances() as f64 * ratio).floor() as usize;
        self.shed_to(target)
    }
}

fn clamp_priority(priority: i32) -> u8 {
    priority.clamp(0, MAX_PRIORITY as i32) as u8
}

/// Pick the evictable record with the highest score:
/// `(idle time / max(1, accesses)) / 2^priority`. On equal scores the least
/// recently touched record goes first.
fn select_victim<H>(state: &State<H>, now: Instant, exempt_priority: u8) -> Option<String> {
    let mut best: Option<(&String, f64, &InstanceRecord<H>)> = None;
    for (id, record) in &state.records {
        if record.priority >= exempt_priority {
            continue;
        }
        let score = eviction_score(record, now);
        let better = match best {
            None => true,
            Some((_, best_score, best_record)) => {
                score > best_score
                    || (score == best_score
                        && (record.last_access_at, record.last_touch)
                            < (best_record.last_access_at, best_record.last_touch))
            }
        };
        if better {
            best = Some((id, score, record));
        }
    }
    best.map(|(id, _, _)| id.clone())
}

fn eviction_score<H>(record: &InstanceRecord<H>, now: Instant) -> f64 {
    let idle = now.saturating_duration_since(record.last_access_at).as_secs_f64();
    let frequency = record.access_count.max(1) as f64;
    (idle / frequency) / 2f64.powi(record.priority as i32)
}

fn dispose_handle<H: Disposable>(id: &str, handle: &H) {
    match catch_panic(|| handle.dispose()) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(
                target = "lumen.registry",
                id = %id,
                error = %err,
                "instance disposal failed"
            );
        }
        Err(panic) => {
            tracing::error!(
                target = "lumen.registry",
                id = %id,
                panic = %panic,
                "instance disposal panicked"
            );
        }
    }
}
