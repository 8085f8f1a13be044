//! # Pool Registry
//!
//! Single entry point for creating, finding and maintaining pools.
//!
//! ## Ownership
//!
//! The registry owns every pool, every factory and the host scheduler. It
//! is constructed by the application's composition root and passed to
//! consumers by reference; there is no global instance.
//!
//! ## Maintenance Tick
//!
//! ```text
//! 1. Record this tick's peak concurrent active count into the sliding window
//! 2. Snapshot every pool's idle and fragmentation rates
//! 3. Expand pools whose idle rate is below 1 - sensitivity
//! 4. Defragment pools above their fragmentation threshold
//! 5. Trim free instances idle past the pool's shrink delay
//! ```
//!
//! Decisions in steps 3-5 use the snapshot from step 2, so one pool's
//! mutation never feeds into another pool's decision in the same tick.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::config::{CacheTier, PoolConfig, RegistryConfig};
use crate::error::{PoolError, PoolResult};
use crate::factory::{InstanceFactory, Placement};
use crate::instance::{InstanceHandle, PoolKey};
use crate::pool::{Pool, PoolStats};
use crate::schedule::{ReleaseScheduler, ReleaseTicket, TickScheduler};
use crate::window::RequestWindow;

/// What one maintenance tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Sequence number of the tick (1-based).
    pub tick: u64,
    /// Acquire requests seen since the previous tick.
    pub requests: u32,
    /// Peak of concurrently active instances, across all pools, since the
    /// previous tick. This is the sample recorded into the request window.
    pub peak_active: u32,
    /// Pools that grew.
    pub expanded: Vec<PoolKey>,
    /// Pools that were compacted.
    pub defragmented: Vec<PoolKey>,
    /// Idle instances destroyed across all pools.
    pub trimmed: usize,
    /// Growth attempts that failed in the factory.
    pub failures: usize,
}

/// What one `advance` call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Acquisitions ended by their auto-release timer.
    pub auto_released: usize,
    /// Maintenance ticks that came due during the step.
    pub maintenance: Vec<MaintenanceReport>,
}

/// Registry of all pools for one instance type.
pub struct PoolRegistry<T, S = TickScheduler> {
    /// Registry-wide settings.
    config: RegistryConfig,
    /// Host scheduler driving auto-release.
    scheduler: S,
    /// Factories by key.
    factories: HashMap<String, Rc<dyn InstanceFactory<T>>>,
    /// Pools, indexed by `PoolKey`.
    pools: Vec<Pool<T>>,
    /// Pool keys by pool id.
    by_id: HashMap<String, PoolKey>,
    /// First pool registered for each factory key.
    by_factory: HashMap<String, PoolKey>,
    /// Pool keys per cache tier.
    tiers: [Vec<PoolKey>; 3],
    /// Per-tick peak concurrency.
    window: RequestWindow,
    /// Requests since the last maintenance tick.
    tick_requests: u32,
    /// Peak concurrently active instances since the last maintenance tick.
    tick_peak_active: usize,
    /// Counter for synthesized pool ids.
    generated_ids: u64,
    /// Maintenance ticks run.
    maintenance_ticks: u64,
    /// Time accumulated towards the next maintenance tick.
    since_maintenance: Duration,
}

impl<T> PoolRegistry<T, TickScheduler> {
    /// Creates a registry driven by a fresh `TickScheduler`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the registry config fails validation.
    pub fn new(config: RegistryConfig) -> PoolResult<Self> {
        Self::with_scheduler(config, TickScheduler::new())
    }

    /// Advances host time by one fixed step.
    ///
    /// Delivers every auto-release that came due, then runs the maintenance
    /// tick once per elapsed `maintenance_interval`.
    pub fn advance(&mut self, dt: Duration) -> StepReport {
        let mut report = StepReport::default();

        for ticket in self.scheduler.advance(dt) {
            if self.fire(ticket) {
                report.auto_released += 1;
            }
        }

        let interval = self.config.maintenance_interval();
        self.since_maintenance = self.since_maintenance.saturating_add(dt);
        while self.since_maintenance >= interval {
            self.since_maintenance -= interval;
            report.maintenance.push(self.run_maintenance_tick());
        }
        report
    }
}

impl<T, S: ReleaseScheduler> PoolRegistry<T, S> {
    /// Creates a registry driven by the given host scheduler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the registry config fails validation.
    pub fn with_scheduler(config: RegistryConfig, scheduler: S) -> PoolResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            scheduler,
            factories: HashMap::new(),
            pools: Vec::new(),
            by_id: HashMap::new(),
            by_factory: HashMap::new(),
            tiers: Default::default(),
            window: RequestWindow::new(),
            tick_requests: 0,
            tick_peak_active: 0,
            generated_ids: 0,
            maintenance_ticks: 0,
            since_maintenance: Duration::ZERO,
        })
    }

    /// Registry-wide settings.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The host scheduler.
    #[inline]
    #[must_use]
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// The host scheduler, mutably.
    #[inline]
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Registers a factory under `key`, replacing any previous one.
    ///
    /// Pools already created keep the factory they were built with.
    pub fn register_factory<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: InstanceFactory<T> + 'static,
    {
        self.register_shared_factory(key, Rc::new(factory));
    }

    /// Registers a factory that is also held elsewhere.
    pub fn register_shared_factory(
        &mut self,
        key: impl Into<String>,
        factory: Rc<dyn InstanceFactory<T>>,
    ) {
        let key = key.into();
        if self.factories.insert(key.clone(), factory).is_some() {
            tracing::debug!("factory {} replaced", key);
        }
    }

    /// Whether a factory is registered under `key`.
    #[must_use]
    pub fn has_factory(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registers a pool, failing if its id is taken.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePoolId`, `UnknownFactory` or `InvalidConfig`. If
    /// `prewarm_on_create` is set and prewarming fails, the pool stays
    /// registered and the `FactoryFailure` is returned.
    pub fn try_create_pool(&mut self, config: PoolConfig) -> PoolResult<PoolKey> {
        if self.by_id.contains_key(&config.id) {
            return Err(PoolError::DuplicatePoolId(config.id));
        }
        let factory = self
            .factories
            .get(&config.factory)
            .cloned()
            .ok_or_else(|| PoolError::UnknownFactory(config.factory.clone()))?;
        let raw = u32::try_from(self.pools.len())
            .map_err(|_| PoolError::InvalidConfig("pool key space exhausted".to_string()))?;
        let key = PoolKey::from_raw(raw);

        let id = config.id.clone();
        let factory_key = config.factory.clone();
        let tier = config.tier;
        let prewarm = config.prewarm_on_create;
        let pool = Pool::new(key, config, factory)?;

        self.pools.push(pool);
        self.by_id.insert(id.clone(), key);
        self.by_factory.entry(factory_key).or_insert(key);
        self.tiers[tier.index()].push(key);
        tracing::debug!("pool {} registered as {} in tier {:?}", id, key, tier);

        if prewarm {
            let now = self.scheduler.now();
            self.pools[key.index()].prewarm(now)?;
        }
        Ok(key)
    }

    /// Registers a pool; re-registering an existing id returns the
    /// existing pool's key instead of failing.
    ///
    /// # Errors
    ///
    /// Same as [`PoolRegistry::try_create_pool`], minus `DuplicatePoolId`.
    pub fn create_pool(&mut self, config: PoolConfig) -> PoolResult<PoolKey> {
        match self.try_create_pool(config) {
            Err(PoolError::DuplicatePoolId(id)) => {
                tracing::debug!("pool {} already registered, reusing it", id);
                self.by_id
                    .get(&id)
                    .copied()
                    .ok_or(PoolError::UnknownPool(id))
            }
            other => other,
        }
    }

    /// Registers every pool of a manifest, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first pool that fails to register.
    pub fn create_pools<'a>(
        &mut self,
        configs: impl IntoIterator<Item = &'a PoolConfig>,
    ) -> PoolResult<Vec<PoolKey>> {
        configs
            .into_iter()
            .map(|config| self.create_pool(config.clone()))
            .collect()
    }

    /// Returns the pool serving `factory_key`, creating one with default
    /// growth policy and a generated id if there is none.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFactory` or `InvalidConfig` for unusable sizes.
    pub fn get_or_create_pool(
        &mut self,
        factory_key: &str,
        initial_size: usize,
        max_size: usize,
        tier: CacheTier,
    ) -> PoolResult<PoolKey> {
        if let Some(&key) = self.by_factory.get(factory_key) {
            return Ok(key);
        }
        let id = self.generate_id(factory_key);
        let config = self
            .config
            .synthesize(id, factory_key, initial_size, max_size, tier);
        self.try_create_pool(config)
    }

    /// Finds a pool by id, then by factory key.
    #[must_use]
    pub fn resolve(&self, id_or_factory: &str) -> Option<PoolKey> {
        self.by_id
            .get(id_or_factory)
            .or_else(|| self.by_factory.get(id_or_factory))
            .copied()
    }

    /// The pool behind `key`.
    #[must_use]
    pub fn pool(&self, key: PoolKey) -> Option<&Pool<T>> {
        self.pools.get(key.index())
    }

    /// The pool registered under `id`.
    #[must_use]
    pub fn pool_by_id(&self, id: &str) -> Option<&Pool<T>> {
        self.by_id.get(id).and_then(|&key| self.pool(key))
    }

    /// Diagnostics of the pool behind `key`.
    #[must_use]
    pub fn stats(&self, key: PoolKey) -> Option<PoolStats> {
        self.pool(key).map(Pool::stats)
    }

    /// All pools, in registration order.
    pub fn pools(&self) -> impl Iterator<Item = &Pool<T>> {
        self.pools.iter()
    }

    /// Number of registered pools.
    #[inline]
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Keys of the pools in `tier`.
    #[must_use]
    pub fn tier_pools(&self, tier: CacheTier) -> &[PoolKey] {
        &self.tiers[tier.index()]
    }

    /// Per-tick history of peak concurrent active instances.
    #[inline]
    #[must_use]
    pub const fn request_window(&self) -> &RequestWindow {
        &self.window
    }

    /// Maintenance ticks run so far.
    #[inline]
    #[must_use]
    pub const fn maintenance_ticks(&self) -> u64 {
        self.maintenance_ticks
    }

    /// Acquires from the pool named by id or factory key.
    ///
    /// An unseen factory key gets a pool synthesized from the registry
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` if nothing matches, otherwise whatever
    /// [`Pool::acquire`] returns.
    pub fn acquire(
        &mut self,
        id_or_factory: &str,
        placement: Option<&Placement>,
    ) -> PoolResult<InstanceHandle> {
        let key = self.resolve_or_create(id_or_factory)?;
        self.acquire_with(key, placement, None)
    }

    /// Like [`PoolRegistry::acquire`], with an explicit auto-release delay.
    ///
    /// # Errors
    ///
    /// Same as [`PoolRegistry::acquire`].
    pub fn acquire_for(
        &mut self,
        id_or_factory: &str,
        placement: Option<&Placement>,
        lifetime: Duration,
    ) -> PoolResult<InstanceHandle> {
        let key = self.resolve_or_create(id_or_factory)?;
        self.acquire_with(key, placement, Some(lifetime))
    }

    /// Acquires from a pool by key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` for a key this registry never issued.
    pub fn acquire_from(
        &mut self,
        key: PoolKey,
        placement: Option<&Placement>,
    ) -> PoolResult<InstanceHandle> {
        self.acquire_with(key, placement, None)
    }

    /// Ends an acquisition. Releasing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` if the handle names a pool this registry does
    /// not own.
    pub fn release(&mut self, handle: InstanceHandle) -> PoolResult<bool> {
        let Some(pool) = self.pools.get_mut(handle.pool().index()) else {
            tracing::warn!("release for unknown {} ignored", handle.pool());
            return Err(PoolError::UnknownPool(handle.pool().to_string()));
        };
        Ok(pool.release(&mut self.scheduler, handle))
    }

    /// Takes back an instance that never came from a pool and destroys it
    /// through the factory registered under `factory_key`.
    ///
    /// Without such a factory the instance is dropped as a best effort.
    pub fn release_detached(&mut self, factory_key: &str, instance: T) {
        if let Some(factory) = self.factories.get(factory_key) {
            tracing::warn!(
                "instance released without a pool, destroying via factory {}",
                factory_key
            );
            factory.destroy(instance);
        } else {
            tracing::error!(
                "instance released without a pool and no factory {} to destroy it, dropping",
                factory_key
            );
            drop(instance);
        }
    }

    /// Delivers a fired auto-release. Stale tickets are ignored.
    ///
    /// Returns whether an acquisition was ended.
    pub fn fire(&mut self, ticket: ReleaseTicket) -> bool {
        let handle = ticket.handle;
        let Some(pool) = self.pools.get_mut(handle.pool().index()) else {
            tracing::warn!("auto-release for unknown {} ignored", handle.pool());
            return false;
        };
        pool.release(&mut self.scheduler, handle)
    }

    /// The instance behind an active handle.
    #[must_use]
    pub fn get(&self, handle: InstanceHandle) -> Option<&T> {
        self.pool(handle.pool())?.get(handle)
    }

    /// The instance behind an active handle, mutably.
    pub fn get_mut(&mut self, handle: InstanceHandle) -> Option<&mut T> {
        self.pools.get_mut(handle.pool().index())?.get_mut(handle)
    }

    /// Whether `handle` is a live acquisition.
    #[must_use]
    pub fn is_active(&self, handle: InstanceHandle) -> bool {
        self.pool(handle.pool())
            .is_some_and(|pool| pool.is_active(handle))
    }

    /// Fills one pool up to its initial size.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` or the pool's `FactoryFailure`.
    pub fn prewarm(&mut self, key: PoolKey) -> PoolResult<usize> {
        let now = self.scheduler.now();
        self.pool_mut(key)?.prewarm(now)
    }

    /// Grows one pool by one step.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` or the pool's `FactoryFailure`.
    pub fn expand(&mut self, key: PoolKey) -> PoolResult<usize> {
        let now = self.scheduler.now();
        self.pool_mut(key)?.expand(now)
    }

    /// Compacts one pool.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` for a foreign key.
    pub fn defragment(&mut self, key: PoolKey) -> PoolResult<usize> {
        let pool = self
            .pools
            .get_mut(key.index())
            .ok_or_else(|| PoolError::UnknownPool(key.to_string()))?;
        Ok(pool.defragment(&mut self.scheduler))
    }

    /// Clears one pool, handing back its detached active instances paired
    /// with their (now stale) handles.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` for a foreign key.
    pub fn clear(&mut self, key: PoolKey) -> PoolResult<Vec<(InstanceHandle, T)>> {
        let pool = self
            .pools
            .get_mut(key.index())
            .ok_or_else(|| PoolError::UnknownPool(key.to_string()))?;
        Ok(pool.clear(&mut self.scheduler))
    }

    /// Prewarms every pool in `tier`.
    ///
    /// Every pool is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all pools were attempted.
    pub fn prewarm_tier(&mut self, tier: CacheTier) -> PoolResult<usize> {
        let now = self.scheduler.now();
        let mut created = 0;
        let mut first_error = None;

        for &key in &self.tiers[tier.index()] {
            let pool = &mut self.pools[key.index()];
            match pool.prewarm(now) {
                Ok(count) => created += count,
                Err(err) => {
                    tracing::warn!("prewarm of pool {} failed: {}", pool.id(), err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(created),
        }
    }

    /// Clears every pool in `tier`.
    ///
    /// Free instances are destroyed. Active instances are not: they are
    /// returned with the handles their holders were given, and the caller
    /// owns them from here on (see [`PoolRegistry::release_detached`]).
    pub fn clear_tier(&mut self, tier: CacheTier) -> Vec<(InstanceHandle, T)> {
        let mut detached = Vec::new();
        for &key in &self.tiers[tier.index()] {
            let pool = &mut self.pools[key.index()];
            let before = detached.len();
            detached.extend(pool.clear(&mut self.scheduler));
            if detached.len() > before {
                tracing::debug!(
                    "pool {} handed {} active instances back to their owners",
                    pool.id(),
                    detached.len() - before
                );
            }
        }
        detached
    }

    /// Stage lifecycle: a stage finished loading. Prewarms tier L1.
    ///
    /// # Errors
    ///
    /// Returns the first prewarm failure.
    pub fn on_stage_loaded(&mut self, stage_id: &str) -> PoolResult<usize> {
        tracing::info!(
            "stage {} loaded, prewarming {} L1 pools",
            stage_id,
            self.tiers[CacheTier::L1.index()].len()
        );
        self.prewarm_tier(CacheTier::L1)
    }

    /// Stage lifecycle: a stage is unloading. Clears tier L1 and returns
    /// the instances that were still active, as [`PoolRegistry::clear_tier`].
    ///
    /// L2 pools live for the whole process and L3 pools are managed by
    /// explicit calls only; neither is touched here.
    pub fn on_stage_unloaded(&mut self, stage_id: &str) -> Vec<(InstanceHandle, T)> {
        let detached = self.clear_tier(CacheTier::L1);
        tracing::info!(
            "stage {} unloaded, cleared {} L1 pools, {} active instances detached",
            stage_id,
            self.tiers[CacheTier::L1.index()].len(),
            detached.len()
        );
        detached
    }

    /// Runs one adaptive maintenance pass over all pools.
    pub fn run_maintenance_tick(&mut self) -> MaintenanceReport {
        let requests = std::mem::take(&mut self.tick_requests);
        let peak_active = u32::try_from(self.tick_peak_active).unwrap_or(u32::MAX);
        self.window.record(peak_active);
        self.tick_peak_active = self.active_total();
        self.maintenance_ticks += 1;

        let global = self.config.expansion_sensitivity;
        let plan: Vec<(bool, bool)> = self
            .pools
            .iter()
            .map(|pool| {
                let expand = pool.idle_rate() < 1.0 - pool.expansion_sensitivity(global);
                let defragment =
                    pool.fragmentation_rate() > pool.config().fragmentation_threshold;
                (expand, defragment)
            })
            .collect();

        let mut report = MaintenanceReport {
            tick: self.maintenance_ticks,
            requests,
            peak_active,
            ..MaintenanceReport::default()
        };
        let now = self.scheduler.now();

        for (pool, (expand, defragment)) in self.pools.iter_mut().zip(plan) {
            if expand {
                match pool.expand(now) {
                    Ok(0) => {}
                    Ok(_) => report.expanded.push(pool.key()),
                    Err(err) => {
                        tracing::warn!("maintenance growth of pool {} failed: {}", pool.id(), err);
                        report.failures += 1;
                    }
                }
            }
            if defragment {
                pool.defragment(&mut self.scheduler);
                report.defragmented.push(pool.key());
            }
            report.trimmed += pool.trim_idle(now);
        }

        report
    }

    fn pool_mut(&mut self, key: PoolKey) -> PoolResult<&mut Pool<T>> {
        self.pools
            .get_mut(key.index())
            .ok_or_else(|| PoolError::UnknownPool(key.to_string()))
    }

    fn resolve_or_create(&mut self, id_or_factory: &str) -> PoolResult<PoolKey> {
        if let Some(key) = self.resolve(id_or_factory) {
            return Ok(key);
        }
        if self.has_factory(id_or_factory) {
            let (initial, max, tier) = (
                self.config.default_initial_size,
                self.config.default_max_size,
                self.config.default_tier,
            );
            return self.get_or_create_pool(id_or_factory, initial, max, tier);
        }
        tracing::warn!("acquire for unknown pool {}", id_or_factory);
        Err(PoolError::UnknownPool(id_or_factory.to_string()))
    }

    fn acquire_with(
        &mut self,
        key: PoolKey,
        placement: Option<&Placement>,
        lifetime: Option<Duration>,
    ) -> PoolResult<InstanceHandle> {
        self.tick_requests = self.tick_requests.saturating_add(1);

        let pool = self
            .pools
            .get_mut(key.index())
            .ok_or_else(|| PoolError::UnknownPool(key.to_string()))?;
        let result = match lifetime {
            Some(lifetime) => pool.acquire_for(&mut self.scheduler, placement, lifetime),
            None => pool.acquire(&mut self.scheduler, placement),
        };

        match &result {
            Err(PoolError::Exhausted { pool, capacity }) => {
                tracing::debug!("pool {} exhausted at {}, request dropped", pool, capacity);
            }
            Err(err) => tracing::warn!("acquire from {} failed: {}", key, err),
            Ok(_) => {
                self.tick_peak_active = self.tick_peak_active.max(self.active_total());
            }
        }
        result
    }

    /// Active instances across all pools.
    fn active_total(&self) -> usize {
        self.pools.iter().map(Pool::active_count).sum()
    }

    fn generate_id(&mut self, factory_key: &str) -> String {
        loop {
            self.generated_ids += 1;
            let id = format!("{factory_key}#{}", self.generated_ids);
            if !self.by_id.contains_key(&id) {
                return id;
            }
        }
    }
}
