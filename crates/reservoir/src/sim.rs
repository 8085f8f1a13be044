//! # Projectile Simulation
//!
//! Deterministic fixed-step workload for the pool registry: bursts of
//! projectiles are spawned from the manifest's pools, fly until they hit
//! something (manual release) or their lifetime runs out (auto-release),
//! and a few are despawned by "physics" without telling the pool.
//!
//! Same seed and manifest, same `SimReport`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reservoir_core::{
    FactoryError, FnLifecycle, InstanceFactory, InstanceHandle, Lifecycle, Placement, PoolError,
    PoolKey, PoolManifest, PoolRegistry, PoolResult,
};

/// Spawn height above the arena floor.
const MUZZLE_HEIGHT: f32 = 1.5;

/// Half-extent of the square arena spawns are scattered over.
const ARENA_HALF_EXTENT: f32 = 50.0;

/// A pooled projectile.
#[derive(Clone, Debug, PartialEq)]
pub struct Projectile {
    /// Serial assigned by the factory.
    pub serial: u64,
    /// World position.
    pub position: [f32; 3],
    /// Units per second.
    pub velocity: [f32; 3],
    /// Ticks flown in the current flight.
    pub age_ticks: u32,
    /// Flights started, across reuses.
    pub flights: u32,
    despawned: bool,
}

impl Projectile {
    /// Marks the projectile as destroyed by the host (e.g. physics).
    pub fn despawn(&mut self) {
        self.despawned = true;
    }

    /// Whether the host destroyed this projectile.
    #[inline]
    #[must_use]
    pub const fn is_despawned(&self) -> bool {
        self.despawned
    }
}

/// Builds projectiles and aims them along the spawn rotation.
#[derive(Debug)]
pub struct ProjectileFactory {
    muzzle_speed: f32,
    next_serial: Cell<u64>,
    destroyed: Cell<u64>,
}

impl ProjectileFactory {
    /// Creates a factory firing at `muzzle_speed` units per second.
    #[must_use]
    pub const fn new(muzzle_speed: f32) -> Self {
        Self {
            muzzle_speed,
            next_serial: Cell::new(0),
            destroyed: Cell::new(0),
        }
    }

    /// Projectiles created so far.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.next_serial.get()
    }

    /// Projectiles destroyed so far.
    #[must_use]
    pub fn destroyed(&self) -> u64 {
        self.destroyed.get()
    }
}

impl InstanceFactory<Projectile> for ProjectileFactory {
    fn create(&self) -> Result<Projectile, FactoryError> {
        let serial = self.next_serial.get();
        self.next_serial.set(serial + 1);
        Ok(Projectile {
            serial,
            position: [0.0; 3],
            velocity: [0.0; 3],
            age_ticks: 0,
            flights: 0,
            despawned: false,
        })
    }

    fn destroy(&self, instance: Projectile) {
        tracing::trace!("projectile {} destroyed", instance.serial);
        self.destroyed.set(self.destroyed.get() + 1);
    }

    fn is_alive(&self, instance: &Projectile) -> bool {
        !instance.despawned
    }

    fn place(&self, instance: &mut Projectile, placement: &Placement) {
        let [x, y, z] = forward(placement.rotation);
        instance.position = placement.position;
        instance.velocity = [
            x * self.muzzle_speed,
            y * self.muzzle_speed,
            z * self.muzzle_speed,
        ];
    }

    fn listeners(&self, _instance: &Projectile) -> Vec<Box<dyn Lifecycle<Projectile>>> {
        vec![Box::new(FnLifecycle::new(
            |projectile: &mut Projectile| projectile.flights += 1,
            |projectile: &mut Projectile| {
                projectile.velocity = [0.0; 3];
                projectile.age_ticks = 0;
            },
        ))]
    }
}

/// Rotates the +Z axis by a unit quaternion `[x, y, z, w]`.
#[must_use]
pub fn forward(rotation: [f32; 4]) -> [f32; 3] {
    let [qx, qy, qz, qw] = rotation;
    // t = 2 * cross(q.xyz, +Z)
    let (tx, ty) = (2.0 * qy, -2.0 * qx);
    // v' = +Z + w * t + cross(q.xyz, t)
    [
        qw * tx - qz * ty,
        qw * ty + qz * tx,
        1.0 + qx * ty - qy * tx,
    ]
}

/// Simulation knobs.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// RNG seed.
    pub seed: u64,
    /// Fixed steps per second.
    pub tick_rate: u32,
    /// Simulated seconds.
    pub duration_secs: u32,
    /// Upper bound of projectiles spawned per tick.
    pub max_burst: u32,
    /// Per-tick chance that a live projectile hits something.
    pub hit_chance: f64,
    /// Per-tick chance that physics despawns a live projectile.
    pub despawn_chance: f64,
    /// Projectile speed in units per second.
    pub muzzle_speed: f32,
    /// Seconds between stage reloads (0 = never).
    pub stage_reload_secs: u32,
    /// Stage name reported to the registry.
    pub stage: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            tick_rate: 60,
            duration_secs: 30,
            max_burst: 6,
            hit_chance: 0.02,
            despawn_chance: 0.002,
            muzzle_speed: 40.0,
            stage_reload_secs: 10,
            stage: "proving_grounds".to_string(),
        }
    }
}

impl SimConfig {
    /// Duration of one fixed step.
    #[must_use]
    pub fn step(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }

    /// Steps in the whole run.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        u64::from(self.duration_secs) * u64::from(self.tick_rate)
    }

    /// Checks the knobs before a run.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero tick rate or chances outside
    /// `[0, 1]`.
    pub fn validate(&self) -> PoolResult<()> {
        if self.tick_rate == 0 {
            return Err(PoolError::InvalidConfig(
                "sim: tick_rate must be greater than zero".to_string(),
            ));
        }
        for (field, value) in [
            ("hit_chance", self.hit_chance),
            ("despawn_chance", self.despawn_chance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoolError::InvalidConfig(format!(
                    "sim: {field} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Totals for a simulation run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimReport {
    /// Fixed steps executed.
    pub ticks: u64,
    /// Successful acquisitions.
    pub spawned: u64,
    /// Spawns dropped because the pool was at capacity.
    pub exhausted: u64,
    /// Spawns dropped for any other error.
    pub failures: u64,
    /// Projectiles released manually on impact.
    pub hits: u64,
    /// Projectiles ended by their lifetime.
    pub auto_releases: u64,
    /// Projectiles destroyed behind the pool's back.
    pub despawned: u64,
    /// Maintenance ticks run.
    pub maintenance_ticks: u64,
    /// Pool growth steps taken by maintenance.
    pub expansions: u64,
    /// Pool compactions run by maintenance.
    pub defragmentations: u64,
    /// Idle instances trimmed by maintenance.
    pub trimmed: u64,
    /// Stage unload/load cycles.
    pub stage_reloads: u64,
    /// Most projectiles in flight at once.
    pub peak_live: usize,
}

/// A seeded projectile workload bound to one registry.
pub struct Simulation {
    config: SimConfig,
    registry: PoolRegistry<Projectile>,
    factory: Rc<ProjectileFactory>,
    rng: ChaCha8Rng,
    spawn_pools: Vec<PoolKey>,
    live: Vec<InstanceHandle>,
    report: SimReport,
}

impl Simulation {
    /// Builds the registry from `manifest` and loads the first stage.
    ///
    /// Every factory key the manifest names is served by one shared
    /// `ProjectileFactory`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for bad settings, or the first pool
    /// registration or prewarm failure.
    pub fn new(config: SimConfig, manifest: &PoolManifest) -> PoolResult<Self> {
        config.validate()?;

        let factory = Rc::new(ProjectileFactory::new(config.muzzle_speed));
        let mut registry = PoolRegistry::new(manifest.registry.clone())?;
        for pool in &manifest.pools {
            if !registry.has_factory(&pool.factory) {
                registry.register_shared_factory(pool.factory.clone(), factory.clone());
            }
        }
        let spawn_pools = registry.create_pools(&manifest.pools)?;
        registry.on_stage_loaded(&config.stage)?;

        tracing::info!(
            "simulation ready: {} pools, seed {:#x}, {} ticks",
            spawn_pools.len(),
            config.seed,
            config.total_ticks()
        );

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            registry,
            factory,
            spawn_pools,
            live: Vec::new(),
            report: SimReport::default(),
        })
    }

    /// The simulation's settings.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The registry being driven.
    #[must_use]
    pub const fn registry(&self) -> &PoolRegistry<Projectile> {
        &self.registry
    }

    /// The shared projectile factory.
    #[must_use]
    pub fn factory(&self) -> &ProjectileFactory {
        &self.factory
    }

    /// Totals so far.
    #[must_use]
    pub const fn report(&self) -> &SimReport {
        &self.report
    }

    /// Projectiles currently in flight.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Runs one fixed step. Returns false once the run is over.
    pub fn tick(&mut self) -> bool {
        if self.report.ticks >= self.config.total_ticks() {
            return false;
        }
        self.report.ticks += 1;

        self.spawn();
        self.simulate();

        let step = self.registry.advance(self.config.step());
        self.report.auto_releases += step.auto_released as u64;
        for maintenance in &step.maintenance {
            self.report.maintenance_ticks += 1;
            self.report.expansions += maintenance.expanded.len() as u64;
            self.report.defragmentations += maintenance.defragmented.len() as u64;
            self.report.trimmed += maintenance.trimmed as u64;
        }
        self.forget_inactive();

        self.reload_stage_if_due();
        true
    }

    /// Runs to the end and returns the totals.
    pub fn run(&mut self) -> &SimReport {
        while self.tick() {}
        &self.report
    }

    fn spawn(&mut self) {
        if self.spawn_pools.is_empty() {
            return;
        }

        let burst = self.rng.gen_range(0..=self.config.max_burst);
        for _ in 0..burst {
            let key = self.spawn_pools[self.rng.gen_range(0..self.spawn_pools.len())];
            let half_yaw = self.rng.gen_range(0.0..std::f32::consts::PI);
            let placement = Placement::at([
                self.rng.gen_range(-ARENA_HALF_EXTENT..ARENA_HALF_EXTENT),
                MUZZLE_HEIGHT,
                self.rng.gen_range(-ARENA_HALF_EXTENT..ARENA_HALF_EXTENT),
            ])
            .with_rotation([0.0, half_yaw.sin(), 0.0, half_yaw.cos()]);

            match self.registry.acquire_from(key, Some(&placement)) {
                Ok(handle) => {
                    self.live.push(handle);
                    self.report.spawned += 1;
                }
                Err(err) if err.is_capacity() => self.report.exhausted += 1,
                Err(err) => {
                    tracing::warn!("spawn from {} failed: {}", key, err);
                    self.report.failures += 1;
                }
            }
        }
        self.report.peak_live = self.report.peak_live.max(self.live.len());
    }

    fn simulate(&mut self) {
        let dt = self.config.step().as_secs_f32();

        let mut index = 0;
        while index < self.live.len() {
            let handle = self.live[index];
            if let Some(projectile) = self.registry.get_mut(handle) {
                for (axis, speed) in projectile.position.iter_mut().zip(projectile.velocity) {
                    *axis += speed * dt;
                }
                projectile.age_ticks += 1;
            }

            if self.rng.gen_bool(self.config.hit_chance) {
                self.live.swap_remove(index);
                if self.registry.release(handle).unwrap_or(false) {
                    self.report.hits += 1;
                }
                continue;
            }
            if self.rng.gen_bool(self.config.despawn_chance) {
                if let Some(projectile) = self.registry.get_mut(handle) {
                    projectile.despawn();
                }
                self.live.swap_remove(index);
                self.report.despawned += 1;
                continue;
            }
            index += 1;
        }
    }

    fn reload_stage_if_due(&mut self) {
        let every = u64::from(self.config.stage_reload_secs) * u64::from(self.config.tick_rate);
        if every == 0 || self.report.ticks % every != 0 {
            return;
        }

        for (_, projectile) in self.registry.on_stage_unloaded(&self.config.stage) {
            self.factory.destroy(projectile);
        }
        if let Err(err) = self.registry.on_stage_loaded(&self.config.stage) {
            tracing::warn!("stage {} reload incomplete: {}", self.config.stage, err);
        }
        self.forget_inactive();
        self.report.stage_reloads += 1;
    }

    /// Drops handles whose acquisition ended (auto-release, stage clear).
    fn forget_inactive(&mut self) {
        let registry = &self.registry;
        self.live.retain(|&handle| registry.is_active(handle));
    }
}
