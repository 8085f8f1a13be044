//! # Pool Property Tests
//!
//! Verifies the pool contract end to end through the registry:
//!
//! 1. **Capacity**: free + active never exceeds `max_size`
//! 2. **Exclusivity**: every tracked instance is free or active, never both
//! 3. **Release**: idempotent, cancels the pending auto-release
//! 4. **Growth**: expansion follows `min(max(1, floor(size * rate)), room)`
//! 5. **Compaction**: externally invalidated entries are purged
//! 6. **Stage lifecycle**: L1 prewarm/clear, L2/L3 untouched, held
//!    instances handed back to their owners
//!
//! Run with: cargo test --package reservoir_core --test pool_properties

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use reservoir_core::{
    CacheTier, FactoryError, FnLifecycle, InstanceFactory, InstanceHandle, Lifecycle, Placement,
    PoolConfig, PoolError, PoolManifest, PoolRegistry, RegistryConfig, ReleaseScheduler,
    ReleaseTicket,
};

/// A pooled drone. `alive` is shared with the factory so tests can tear a
/// drone down behind the pool's back.
struct Drone {
    serial: u32,
    alive: Rc<Cell<bool>>,
    position: [f32; 3],
}

#[derive(Default)]
struct DroneFactory {
    created: Cell<u32>,
    destroyed: Rc<Cell<u32>>,
    released: Rc<Cell<u32>>,
    lifelines: RefCell<Vec<Rc<Cell<bool>>>>,
}

impl DroneFactory {
    /// Invalidates the drone with the given serial.
    fn kill(&self, serial: u32) {
        self.lifelines.borrow()[serial as usize].set(false);
    }
}

impl InstanceFactory<Drone> for DroneFactory {
    fn create(&self) -> Result<Drone, FactoryError> {
        let serial = self.created.get();
        self.created.set(serial + 1);
        let alive = Rc::new(Cell::new(true));
        self.lifelines.borrow_mut().push(Rc::clone(&alive));
        Ok(Drone {
            serial,
            alive,
            position: [0.0; 3],
        })
    }

    fn destroy(&self, instance: Drone) {
        instance.alive.set(false);
        self.destroyed.set(self.destroyed.get() + 1);
    }

    fn is_alive(&self, instance: &Drone) -> bool {
        instance.alive.get()
    }

    fn place(&self, instance: &mut Drone, placement: &Placement) {
        instance.position = placement.position;
    }

    fn listeners(&self, _instance: &Drone) -> Vec<Box<dyn Lifecycle<Drone>>> {
        let released = Rc::clone(&self.released);
        vec![Box::new(FnLifecycle::new(
            |drone: &mut Drone| drone.position[1] += 0.5,
            move |_drone: &mut Drone| released.set(released.get() + 1),
        ))]
    }
}

fn setup() -> (PoolRegistry<Drone>, Rc<DroneFactory>) {
    let factory = Rc::new(DroneFactory::default());
    let mut registry = PoolRegistry::new(RegistryConfig::default()).unwrap();
    registry.register_shared_factory("drone", factory.clone());
    (registry, factory)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

// ============================================================================
// CORE FLOWS
// ============================================================================

#[test]
fn test_acquire_on_empty_free_list_expands_once() {
    let (mut registry, _) = setup();
    let key = registry
        .create_pool(
            PoolConfig::new("swarm", "drone")
                .with_sizes(5, 10)
                .with_expansion_rate(0.5),
        )
        .unwrap();
    registry.prewarm(key).unwrap();
    assert_eq!(registry.pool(key).unwrap().size(), 5);

    for _ in 0..5 {
        registry.acquire("swarm", None).unwrap();
    }
    registry.acquire("swarm", None).unwrap();

    let pool = registry.pool(key).unwrap();
    assert_eq!(pool.size(), 7);
    assert_eq!(pool.active_count(), 6);
    assert_eq!(pool.free_count(), 1);
}

#[test]
fn test_acquire_at_capacity_is_exhausted() {
    let (mut registry, _) = setup();
    let key = registry
        .create_pool(PoolConfig::new("swarm", "drone").with_sizes(10, 10).prewarmed())
        .unwrap();
    for _ in 0..10 {
        registry.acquire_from(key, None).unwrap();
    }

    let err = registry.acquire_from(key, None).unwrap_err();
    assert_eq!(
        err,
        PoolError::Exhausted {
            pool: "swarm".to_string(),
            capacity: 10
        }
    );
    assert_eq!(registry.pool(key).unwrap().size(), 10);
}

#[test]
fn test_manual_release_cancels_auto_release() {
    let (mut registry, factory) = setup();
    registry
        .create_pool(
            PoolConfig::new("swarm", "drone")
                .with_sizes(1, 4)
                .with_max_lifetime(Duration::from_secs(2)),
        )
        .unwrap();

    let drone = registry.acquire("swarm", None).unwrap();
    registry.advance(Duration::from_secs(1));
    assert_eq!(registry.release(drone), Ok(true));
    assert_eq!(factory.released.get(), 1);

    let report = registry.advance(Duration::from_secs(1));
    assert_eq!(report.auto_released, 0);
    assert_eq!(factory.released.get(), 1);
    assert_eq!(registry.scheduler().pending_count(), 0);
}

#[test]
fn test_stage_unload_clears_l1_only() {
    let (mut registry, factory) = setup();
    let stage = registry
        .create_pool(PoolConfig::new("stage_drones", "drone").with_sizes(5, 10))
        .unwrap();
    let global = registry
        .create_pool(
            PoolConfig::new("escorts", "drone")
                .with_sizes(3, 6)
                .with_tier(CacheTier::L2)
                .prewarmed(),
        )
        .unwrap();
    let large = registry
        .create_pool(
            PoolConfig::new("motherships", "drone")
                .with_sizes(2, 2)
                .with_tier(CacheTier::L3),
        )
        .unwrap();

    assert_eq!(registry.on_stage_loaded("canyon").unwrap(), 5);
    assert_eq!(registry.pool(stage).unwrap().free_count(), 5);
    assert_eq!(registry.pool(large).unwrap().size(), 0);

    let held = registry.acquire_from(stage, None).unwrap();
    let destroyed_before = factory.destroyed.get();

    let detached = registry.on_stage_unloaded("canyon");
    let pool = registry.pool(stage).unwrap();
    assert_eq!(pool.free_count(), 0);
    assert_eq!(pool.total_created(), 0);
    // Only the four free drones were destroyed. The held one comes back to
    // its owner, alive, tagged with the handle it was acquired under.
    assert_eq!(factory.destroyed.get() - destroyed_before, 4);
    assert!(!registry.is_active(held));
    assert_eq!(detached.len(), 1);
    let (handle, drone) = detached.into_iter().next().unwrap();
    assert_eq!(handle, held);
    assert!(drone.alive.get());

    registry.release_detached("drone", drone);
    assert_eq!(factory.destroyed.get() - destroyed_before, 5);

    let escorts = registry.pool(global).unwrap();
    assert_eq!(escorts.free_count(), 3);
    assert_eq!(escorts.total_created(), 3);
}

// ============================================================================
// AUTO-RELEASE
// ============================================================================

#[test]
fn test_auto_release_fires_once_at_lifetime() {
    let (mut registry, factory) = setup();
    let key = registry
        .create_pool(
            PoolConfig::new("swarm", "drone")
                .with_sizes(1, 1)
                .with_max_lifetime(Duration::from_secs(2)),
        )
        .unwrap();
    let drone = registry.acquire_from(key, None).unwrap();

    assert_eq!(registry.advance(millis(1900)).auto_released, 0);
    assert!(registry.is_active(drone));

    assert_eq!(registry.advance(millis(100)).auto_released, 1);
    assert!(!registry.is_active(drone));
    assert_eq!(registry.pool(key).unwrap().free_count(), 1);
    assert_eq!(factory.released.get(), 1);

    registry.advance(Duration::from_secs(5));
    assert_eq!(factory.released.get(), 1);
}

#[test]
fn test_stale_timer_never_releases_newer_acquisition() {
    let (mut registry, _) = setup();
    let key = registry
        .create_pool(
            PoolConfig::new("swarm", "drone")
                .with_sizes(1, 1)
                .with_max_lifetime(Duration::from_secs(2)),
        )
        .unwrap();

    let first = registry.acquire_from(key, None).unwrap();
    registry.advance(Duration::from_secs(1));
    registry.release(first).unwrap();

    let second = registry.acquire_from(key, None).unwrap();
    assert_eq!(first.slot(), second.slot());

    // The first acquisition's deadline (t=2s) passes without effect.
    assert_eq!(registry.advance(Duration::from_secs(1)).auto_released, 0);
    assert!(registry.is_active(second));

    // Even a stale ticket delivered by hand is ignored.
    assert!(!registry.fire(ReleaseTicket { handle: first }));
    assert!(registry.is_active(second));

    // The second acquisition's own deadline (t=3s) releases it.
    assert_eq!(registry.advance(Duration::from_secs(1)).auto_released, 1);
    assert!(!registry.is_active(second));
}

#[test]
fn test_lifetime_override_per_acquire() {
    let (mut registry, _) = setup();
    registry
        .create_pool(PoolConfig::new("swarm", "drone").with_sizes(2, 2))
        .unwrap();

    let timed = registry
        .acquire_for("swarm", None, millis(500))
        .unwrap();
    let held = registry.acquire("swarm", None).unwrap();

    assert_eq!(registry.advance(millis(500)).auto_released, 1);
    assert!(!registry.is_active(timed));
    assert!(registry.is_active(held));
}

#[test]
fn test_unbounded_lifetime_never_expires() {
    let (mut registry, factory) = setup();
    registry
        .create_pool(PoolConfig::new("swarm", "drone").with_sizes(1, 2))
        .unwrap();

    registry.advance(millis(16));
    let drone = registry
        .acquire_for("swarm", None, Duration::MAX)
        .unwrap();
    for _ in 0..6 {
        assert_eq!(registry.advance(Duration::from_secs(600)).auto_released, 0);
    }
    assert!(registry.is_active(drone));

    assert_eq!(registry.release(drone), Ok(true));
    assert_eq!(factory.released.get(), 1);
    assert_eq!(registry.scheduler().pending_count(), 0);
}

#[test]
fn test_sub_millisecond_lifetime_still_expires() {
    let (mut registry, _) = setup();
    registry
        .create_pool(
            PoolConfig::new("swarm", "drone")
                .with_sizes(1, 2)
                .with_max_lifetime(Duration::from_micros(500)),
        )
        .unwrap();

    let drone = registry.acquire("swarm", None).unwrap();
    assert_eq!(registry.scheduler().pending_count(), 1);
    assert_eq!(registry.advance(millis(1)).auto_released, 1);
    assert!(!registry.is_active(drone));
}

// ============================================================================
// INVARIANTS
// ============================================================================

#[test]
fn test_capacity_and_exclusivity_under_churn() {
    let (mut registry, _) = setup();
    let key = registry
        .create_pool(
            PoolConfig::new("swarm", "drone")
                .with_sizes(3, 12)
                .with_expansion_rate(0.75)
                .prewarmed(),
        )
        .unwrap();

    let mut held: Vec<InstanceHandle> = Vec::new();
    let mut seed: u32 = 0x2545_f491;
    for step in 0..2_000 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;

        if seed % 3 == 0 && !held.is_empty() {
            let handle = held.swap_remove(seed as usize % held.len());
            assert_eq!(registry.release(handle), Ok(true));
            // Second release is a no-op.
            assert_eq!(registry.release(handle), Ok(false));
        } else {
            match registry.acquire_from(key, Some(&Placement::at([step as f32, 0.0, 0.0]))) {
                Ok(handle) => held.push(handle),
                Err(err) => assert!(err.is_capacity()),
            }
        }

        let pool = registry.pool(key).unwrap();
        assert!(pool.size() <= pool.config().max_size);
        assert_eq!(pool.active_count(), held.len());
        assert_eq!(pool.free_count() + pool.active_count(), pool.size());

        let slots: HashSet<u32> = held.iter().map(|h| h.slot()).collect();
        assert_eq!(slots.len(), held.len());
        assert!(held.iter().all(|&h| registry.is_active(h)));
    }
}

#[test]
fn test_expansion_matches_growth_formula() {
    for (initial, max, rate) in [(0, 5, 0.5), (5, 10, 0.5), (4, 100, 0.25), (9, 10, 2.0), (10, 10, 1.0)] {
        let (mut registry, _) = setup();
        let key = registry
            .create_pool(
                PoolConfig::new("swarm", "drone")
                    .with_sizes(initial, max)
                    .with_expansion_rate(rate)
                    .prewarmed(),
            )
            .unwrap();

        let old = registry.pool(key).unwrap().size();
        registry.expand(key).unwrap();
        let new = registry.pool(key).unwrap().size();

        let step = ((old as f64 * f64::from(rate)).floor() as usize).max(1);
        assert!(new <= max);
        assert_eq!(new - old, step.min(max - old), "initial={initial} max={max}");
    }
}

#[test]
fn test_defragment_purges_invalidated_instances() {
    let (mut registry, factory) = setup();
    let key = registry
        .create_pool(PoolConfig::new("swarm", "drone").with_sizes(10, 10).prewarmed())
        .unwrap();
    let held: Vec<_> = (0..4)
        .map(|_| registry.acquire_from(key, None).unwrap())
        .collect();

    // Kill one held drone and three free ones.
    let held_serial = registry.get(held[0]).unwrap().serial;
    factory.kill(held_serial);
    let mut killed = 1;
    for serial in 0..10 {
        if killed == 4 {
            break;
        }
        if held.iter().all(|&h| registry.get(h).unwrap().serial != serial) {
            factory.kill(serial);
            killed += 1;
        }
    }
    assert!((registry.pool(key).unwrap().fragmentation_rate() - 0.4).abs() < 1e-6);

    assert_eq!(registry.defragment(key).unwrap(), 4);
    let pool = registry.pool(key).unwrap();
    assert_eq!(pool.size(), 6);
    assert!(pool.fragmentation_rate().abs() < f32::EPSILON);
    assert_eq!(pool.defrag_count(), 1);
    assert!(!registry.is_active(held[0]));
    assert_eq!(registry.release(held[0]), Ok(false));
    assert_eq!(factory.destroyed.get(), 0);
}

// ============================================================================
// MAINTENANCE
// ============================================================================

#[test]
fn test_maintenance_grows_starved_pools_and_compacts_fragmented_ones() {
    let (mut registry, factory) = setup();
    let starved = registry
        .create_pool(PoolConfig::new("starved", "drone").with_sizes(4, 32).prewarmed())
        .unwrap();
    let rotting = registry
        .create_pool(
            PoolConfig::new("rotting", "drone")
                .with_sizes(4, 4)
                .with_fragmentation_threshold(0.3)
                .prewarmed(),
        )
        .unwrap();

    for _ in 0..4 {
        registry.acquire_from(starved, None).unwrap();
    }
    // Serials 4..8 belong to "rotting"; invalidate half of them.
    factory.kill(4);
    factory.kill(5);

    let report = registry.run_maintenance_tick();
    assert_eq!(report.tick, 1);
    assert_eq!(report.requests, 4);
    assert_eq!(report.expanded, vec![starved]);
    assert_eq!(report.defragmented, vec![rotting]);

    assert_eq!(registry.pool(starved).unwrap().size(), 6);
    assert_eq!(registry.pool(rotting).unwrap().size(), 2);
    assert_eq!(registry.request_window().peak(), 4);
}

#[test]
fn test_maintenance_trims_idle_instances() {
    let (mut registry, factory) = setup();
    let key = registry
        .create_pool(
            PoolConfig::new("burst", "drone")
                .with_sizes(2, 16)
                .with_shrink_after(Duration::from_secs(3))
                .prewarmed(),
        )
        .unwrap();

    let burst: Vec<_> = (0..8)
        .map(|_| registry.acquire_from(key, None).unwrap())
        .collect();
    for handle in burst {
        registry.release(handle).unwrap();
    }
    let peak_size = registry.pool(key).unwrap().size();
    assert!(peak_size > 2);

    let mut trimmed = 0;
    for _ in 0..5 {
        trimmed += registry
            .advance(Duration::from_secs(1))
            .maintenance
            .iter()
            .map(|r| r.trimmed)
            .sum::<usize>();
    }
    assert_eq!(trimmed, peak_size - 2);
    assert_eq!(registry.pool(key).unwrap().size(), 2);
    assert_eq!(factory.destroyed.get() as usize, peak_size - 2);
}

// ============================================================================
// REGISTRATION
// ============================================================================

#[test]
fn test_manifest_registers_pools() {
    let manifest = PoolManifest::from_toml_str(
        r#"
        [registry]
        expansion_sensitivity = 0.6

        [[pools]]
        id = "scouts"
        factory = "drone"
        initial_size = 4
        max_size = 8
        prewarm_on_create = true

        [[pools]]
        id = "bombers"
        factory = "drone"
        max_size = 2
        tier = "l2"
        max_lifetime_ms = 750
        "#,
    )
    .unwrap();

    let factory = Rc::new(DroneFactory::default());
    let mut registry = PoolRegistry::new(manifest.registry.clone()).unwrap();
    registry.register_shared_factory("drone", factory.clone());
    let keys = registry.create_pools(&manifest.pools).unwrap();

    assert_eq!(keys.len(), 2);
    assert_eq!(registry.pool_by_id("scouts").unwrap().size(), 4);
    assert_eq!(registry.tier_pools(CacheTier::L2), &[keys[1]]);
    // The factory key resolves to the first pool registered for it.
    assert_eq!(registry.resolve("drone"), Some(keys[0]));

    let bomber = registry
        .acquire("bombers", Some(&Placement::at([1.0, 2.0, 3.0])))
        .unwrap();
    assert_eq!(registry.get(bomber).unwrap().position, [1.0, 2.5, 3.0]);
    assert_eq!(registry.advance(millis(750)).auto_released, 1);
    assert_eq!(factory.created.get(), 5);
}

#[test]
fn test_release_detached_destroys_directly() {
    let (mut registry, factory) = setup();
    let stray = factory.create().unwrap();

    registry.release_detached("drone", stray);
    assert_eq!(factory.destroyed.get(), 1);
    assert_eq!(registry.pool_count(), 0);
    assert_eq!(registry.scheduler().now(), Duration::ZERO);
}
