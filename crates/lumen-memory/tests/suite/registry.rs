use lumen_core::ManualClock;
use lumen_memory::{
    Disposable, EvictionEvent, EvictionReason, Evictor, InstanceRegistry, RegistryConfig,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct TestChart {
    disposed: AtomicUsize,
    fail: bool,
}

impl TestChart {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            disposed: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            disposed: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Disposable for TestChart {
    fn dispose(&self) -> anyhow::Result<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("renderer already torn down");
        }
        Ok(())
    }
}

fn registry(max_instances: usize, clock: &ManualClock) -> InstanceRegistry<Arc<TestChart>> {
    InstanceRegistry::with_clock(
        RegistryConfig {
            max_instances,
            ..RegistryConfig::default()
        },
        clock.shared(),
    )
}

#[test]
fn evicts_least_recently_used_low_priority_instance() {
    let clock = ManualClock::new();
    let registry = registry(3, &clock);

    let one = TestChart::new();
    let two = TestChart::new();
    let three = TestChart::new();
    registry.register("1", one.clone(), 5);
    registry.register("2", two.clone(), 5);
    registry.register("3", three.clone(), 9);

    clock.advance(Duration::from_secs(1));
    assert!(registry.get("1").is_some());
    clock.advance(Duration::from_secs(1));

    registry.register("4", TestChart::new(), 5);

    assert_eq!(registry.stats().ids, vec!["1", "3", "4"]);
    assert_eq!(two.disposed(), 1);
    assert_eq!(one.disposed(), 0);
    assert_eq!(three.disposed(), 0);
}

#[test]
fn equal_scores_evict_the_least_recently_touched() {
    // The clock never moves, so every score is zero and recency alone decides.
    let clock = ManualClock::new();
    let registry = registry(3, &clock);

    let one = TestChart::new();
    let two = TestChart::new();
    registry.register("1", one.clone(), 5);
    registry.register("2", two.clone(), 5);
    registry.register("3", TestChart::new(), 9);
    assert!(registry.get("1").is_some());

    registry.register("4", TestChart::new(), 5);

    assert_eq!(registry.stats().ids, vec!["1", "3", "4"]);
    assert_eq!(two.disposed(), 1);
    assert_eq!(one.disposed(), 0);
}

#[test]
fn older_access_is_evicted_first() {
    let clock = ManualClock::new();
    let registry = registry(2, &clock);

    registry.register("a", TestChart::new(), 5);
    registry.register("b", TestChart::new(), 5);
    assert!(registry.get("a").is_some());
    clock.advance(Duration::from_secs(10));
    assert!(registry.get("b").is_some());
    clock.advance(Duration::from_secs(1));

    assert_eq!(registry.shed_to(1), 1);
    assert!(!registry.contains("a"));
    assert!(registry.contains("b"));
}

#[test]
fn higher_priority_discounts_idle_time() {
    let clock = ManualClock::new();
    let registry = registry(2, &clock);

    registry.register("background", TestChart::new(), 7);
    clock.advance(Duration::from_secs(5));
    registry.register("fresh", TestChart::new(), 0);
    clock.advance(Duration::from_secs(1));

    // background: 6s / 2^7, fresh: 1s / 2^0
    registry.register("next", TestChart::new(), 5);
    assert_eq!(registry.stats().ids, vec!["background", "next"]);
}

#[test]
fn exempt_priorities_are_never_evicted() {
    let clock = ManualClock::new();
    let registry = registry(3, &clock);
    let charts: Vec<_> = (0..4).map(|_| TestChart::new()).collect();

    for (idx, chart) in charts.iter().enumerate() {
        clock.advance(Duration::from_secs(1));
        registry.register(format!("pinned-{idx}"), chart.clone(), 9);
    }

    let stats = registry.stats();
    assert_eq!(stats.total, 4);
    assert!(charts.iter().all(|chart| chart.disposed() == 0));
}

#[test]
fn capacity_holds_while_evictable_records_exist() {
    let clock = ManualClock::new();
    let registry = registry(5, &clock);

    for idx in 0..40 {
        clock.advance(Duration::from_millis(250));
        // A handful of pinned records, always fewer than the cap.
        let priority = if idx % 13 == 0 { 8 } else { (idx % 8) as i32 };
        registry.register(format!("chart-{idx}"), TestChart::new(), priority);
        if idx % 3 == 0 {
            let _ = registry.get(&format!("chart-{}", idx / 2));
        }
        assert!(registry.len() <= 5, "over capacity after chart-{idx}");
    }
}

#[test]
fn dispose_is_idempotent() {
    let clock = ManualClock::new();
    let registry = registry(10, &clock);
    let chart = TestChart::new();
    registry.register("chart", chart.clone(), 5);
    registry.register("other", TestChart::new(), 5);

    assert!(registry.dispose("chart"));
    let after_first = registry.stats();
    assert!(!registry.dispose("chart"));

    assert_eq!(registry.stats(), after_first);
    assert_eq!(chart.disposed(), 1);
    assert!(registry.get("chart").is_none());
}

#[test]
fn get_records_access_bookkeeping() {
    let clock = ManualClock::new();
    let registry = registry(10, &clock);
    registry.register("a", TestChart::new(), 5);
    registry.register("b", TestChart::new(), 5);

    for id in ["a", "a", "a", "b"] {
        assert!(registry.get(id).is_some());
    }
    assert!(registry.get("missing").is_none());

    let stats = registry.stats();
    assert_eq!(stats.average_access_count, 2.0);
}

#[test]
fn failing_disposal_does_not_stop_teardown() {
    let clock = ManualClock::new();
    let registry = registry(10, &clock);
    let broken = TestChart::failing();
    let healthy = TestChart::new();
    registry.register("broken", broken.clone(), 5);
    registry.register("healthy", healthy.clone(), 5);

    registry.dispose_all();

    assert!(registry.is_empty());
    assert_eq!(broken.disposed(), 1);
    assert_eq!(healthy.disposed(), 1);
}

#[test]
fn lowering_the_cap_sheds_until_only_exempt_records_remain() {
    let clock = ManualClock::new();
    let registry = registry(10, &clock);
    registry.register("pinned-a", TestChart::new(), 8);
    registry.register("pinned-b", TestChart::new(), 10);
    registry.register("a", TestChart::new(), 2);
    registry.register("b", TestChart::new(), 3);

    registry.set_max_instances(1);

    assert_eq!(registry.stats().ids, vec!["pinned-a", "pinned-b"]);
    assert_eq!(registry.max_instances(), 1);
}

#[test]
fn priority_is_clamped_and_can_pin_an_instance() {
    let clock = ManualClock::new();
    let registry = registry(1, &clock);
    registry.register("a", TestChart::new(), -3);
    assert!(registry.set_priority("a", 42));
    assert!(!registry.set_priority("missing", 1));

    registry.register("b", TestChart::new(), 5);
    assert_eq!(registry.stats().ids, vec!["a", "b"]);
}

#[test]
fn reregistering_an_id_disposes_the_old_handle() {
    let clock = ManualClock::new();
    let registry = registry(10, &clock);
    let events: Arc<Mutex<Vec<EvictionEvent>>> = Arc::new(Mutex::new(Vec::new()));
    registry.subscribe({
        let events = events.clone();
        Arc::new(move |event: &EvictionEvent| events.lock().unwrap().push(event.clone()))
    });

    let old = TestChart::new();
    let new = TestChart::new();
    registry.register("chart", old.clone(), 5);
    registry.register("chart", new.clone(), 5);

    assert_eq!(registry.len(), 1);
    assert_eq!(old.disposed(), 1);
    assert_eq!(new.disposed(), 0);
    assert!(Arc::ptr_eq(&registry.get("chart").unwrap(), &new));
    assert_eq!(
        *events.lock().unwrap(),
        vec![EvictionEvent {
            id: "chart".to_string(),
            reason: EvictionReason::Replaced,
        }]
    );
}

#[test]
fn capacity_evictions_are_announced() {
    let clock = ManualClock::new();
    let registry = registry(1, &clock);
    let events: Arc<Mutex<Vec<EvictionEvent>>> = Arc::new(Mutex::new(Vec::new()));
    registry.subscribe({
        let events = events.clone();
        Arc::new(move |event: &EvictionEvent| events.lock().unwrap().push(event.clone()))
    });

    registry.register("first", TestChart::new(), 5);
    registry.register("second", TestChart::new(), 5);

    assert_eq!(
        *events.lock().unwrap(),
        vec![EvictionEvent {
            id: "first".to_string(),
            reason: EvictionReason::Capacity,
        }]
    );
}

#[test]
fn stats_sum_memory_estimates() {
    let clock = ManualClock::new();
    let registry = registry(10, &clock);
    registry.register("a", TestChart::new(), 5);
    registry.register("b", TestChart::new(), 5);
    assert!(registry.update_memory_estimate("a", 1_024));
    assert!(registry.update_memory_estimate("b", 2_048));
    assert!(!registry.update_memory_estimate("c", 1));

    clock.advance(Duration::from_secs(3));
    let stats = registry.stats();
    assert_eq!(stats.total_memory_estimate, 3_072);
    assert_eq!(stats.max_instances, 10);
    assert_eq!(stats.oldest_age, Duration::from_secs(3));

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["total"], 2);
}

#[test]
fn evictor_sheds_to_a_fraction_of_capacity() {
    let clock = ManualClock::new();
    let registry = registry(4, &clock);
    for idx in 0..4 {
        clock.advance(Duration::from_secs(1));
        registry.register(format!("chart-{idx}"), TestChart::new(), 5);
    }

    let evictor: Arc<dyn Evictor> = Arc::new(registry.clone());
    assert_eq!(evictor.evict_to_ratio(0.5), 2);
    assert_eq!(registry.stats().ids, vec!["chart-2", "chart-3"]);
}
