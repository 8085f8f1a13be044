//! # Instance Pool
//!
//! Free-list pool of reusable instances for one resource type.
//!
//! ## Layout
//!
//! Instances live in a slot vector. A slot is either vacant, on the `free`
//! stack, or in the `active` set, never two of these at once. Each slot
//! carries a generation that is bumped whenever an acquisition ends, which
//! is what makes handles and timer tickets single-use.
//!
//! ## Growth
//!
//! The pool grows by `max(1, floor(size * expansion_rate))` instances per
//! step, never past `max_size`. An `acquire` on an empty free list grows the
//! pool once; when it cannot grow it fails with `Exhausted` instead of
//! exceeding capacity.
//!
//! ## Thread Safety
//!
//! This pool is NOT thread-safe. It is driven from a single host loop.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::factory::{InstanceFactory, Placement};
use crate::instance::{InstanceHandle, PoolKey, ResettableInstance};
use crate::schedule::{ReleaseScheduler, ReleaseTicket};

/// One storage slot.
struct Slot<T> {
    /// Bumped every time an acquisition of this slot ends.
    generation: u32,
    /// The tracked instance, `None` while the slot is vacant.
    entry: Option<ResettableInstance<T>>,
}

/// Point-in-time diagnostics of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PoolStats {
    /// Tracked instances (free + active, dead entries included).
    pub size: usize,
    /// Instances on the free list.
    pub free: usize,
    /// Instances held by consumers.
    pub active: usize,
    /// Instances created since the last clear.
    pub total_created: u64,
    /// Highest concurrent active count since the last clear.
    pub peak_active: usize,
    /// Growth steps since the last clear.
    pub expansion_count: u64,
    /// Compactions since the last clear.
    pub defrag_count: u64,
    /// `free / size`, 1.0 when empty.
    pub idle_rate: f32,
    /// `dead / size`, 0.0 when empty.
    pub fragmentation_rate: f32,
}

/// A pool of reusable instances of one resource type.
pub struct Pool<T> {
    /// Registry key, stamped into every handle.
    key: PoolKey,
    /// Immutable settings.
    config: PoolConfig,
    /// Builds and destroys instances.
    factory: Rc<dyn InstanceFactory<T>>,
    /// Slot storage.
    slots: Vec<Slot<T>>,
    /// Slots with no entry, ready for reuse.
    vacant: Vec<u32>,
    /// Free list (stack, most recently released on top).
    free: Vec<u32>,
    /// Slots currently held by consumers.
    active: HashSet<u32>,
    /// Instances created since the last clear.
    total_created: u64,
    /// Peak of `active.len()`.
    peak_active: usize,
    /// Growth steps taken.
    expansion_count: u64,
    /// Compactions run.
    defrag_count: u64,
}

impl<T> Pool<T> {
    /// Creates an empty pool. Nothing is created until `prewarm` or the
    /// first `acquire`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the config fails validation.
    pub fn new(
        key: PoolKey,
        config: PoolConfig,
        factory: Rc<dyn InstanceFactory<T>>,
    ) -> PoolResult<Self> {
        config.validate()?;

        Ok(Self {
            key,
            slots: Vec::with_capacity(config.initial_size),
            vacant: Vec::new(),
            free: Vec::with_capacity(config.initial_size),
            active: HashSet::with_capacity(config.initial_size),
            config,
            factory,
            total_created: 0,
            peak_active: 0,
            expansion_count: 0,
            defrag_count: 0,
        })
    }

    /// The pool's registry key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> PoolKey {
        self.key
    }

    /// The pool's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// The pool's settings.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Tracked instances: free plus active, dead entries included.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.free.len() + self.active.len()
    }

    /// Instances on the free list.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Instances held by consumers.
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Instances created since the last clear.
    #[inline]
    #[must_use]
    pub const fn total_created(&self) -> u64 {
        self.total_created
    }

    /// Highest concurrent active count since the last clear.
    #[inline]
    #[must_use]
    pub const fn peak_active(&self) -> usize {
        self.peak_active
    }

    /// Growth steps since the last clear.
    #[inline]
    #[must_use]
    pub const fn expansion_count(&self) -> u64 {
        self.expansion_count
    }

    /// Compactions since the last clear.
    #[inline]
    #[must_use]
    pub const fn defrag_count(&self) -> u64 {
        self.defrag_count
    }

    /// Share of tracked instances sitting on the free list.
    #[must_use]
    pub fn idle_rate(&self) -> f32 {
        let size = self.size();
        if size == 0 {
            return 1.0;
        }
        self.free.len() as f32 / size as f32
    }

    /// Share of tracked instances whose resource was invalidated externally.
    #[must_use]
    pub fn fragmentation_rate(&self) -> f32 {
        let size = self.size();
        if size == 0 {
            return 0.0;
        }
        self.dead_count() as f32 / size as f32
    }

    /// Effective expansion sensitivity: the pool's override or `global`.
    #[inline]
    #[must_use]
    pub fn expansion_sensitivity(&self, global: f32) -> f32 {
        self.config.expansion_sensitivity.unwrap_or(global)
    }

    /// Snapshot of all diagnostics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size(),
            free: self.free.len(),
            active: self.active.len(),
            total_created: self.total_created,
            peak_active: self.peak_active,
            expansion_count: self.expansion_count,
            defrag_count: self.defrag_count,
            idle_rate: self.idle_rate(),
            fragmentation_rate: self.fragmentation_rate(),
        }
    }

    /// Whether `handle` refers to a live acquisition from this pool.
    #[must_use]
    pub fn is_active(&self, handle: InstanceHandle) -> bool {
        handle.pool() == self.key
            && self.active.contains(&handle.slot())
            && self
                .slots
                .get(handle.slot() as usize)
                .is_some_and(|slot| slot.generation == handle.generation())
    }

    /// The instance behind an active handle.
    #[must_use]
    pub fn get(&self, handle: InstanceHandle) -> Option<&T> {
        if !self.is_active(handle) {
            return None;
        }
        self.slots[handle.slot() as usize]
            .entry
            .as_ref()
            .map(ResettableInstance::value)
    }

    /// The instance behind an active handle, mutably.
    pub fn get_mut(&mut self, handle: InstanceHandle) -> Option<&mut T> {
        if !self.is_active(handle) {
            return None;
        }
        self.slots[handle.slot() as usize]
            .entry
            .as_mut()
            .map(ResettableInstance::value_mut)
    }

    /// The bookkeeping wrapper behind an active handle.
    #[must_use]
    pub fn instance(&self, handle: InstanceHandle) -> Option<&ResettableInstance<T>> {
        if !self.is_active(handle) {
            return None;
        }
        self.slots[handle.slot() as usize].entry.as_ref()
    }

    /// Fills the pool up to `initial_size`.
    ///
    /// Returns how many instances were created (0 if already at or above).
    ///
    /// # Errors
    ///
    /// Returns `FactoryFailure` if the factory fails; instances created
    /// before the failure stay in the pool.
    pub fn prewarm(&mut self, now: Duration) -> PoolResult<usize> {
        let missing = self.config.initial_size.saturating_sub(self.size());
        for _ in 0..missing {
            self.create_one(now)?;
        }
        if missing > 0 {
            tracing::debug!("pool {} prewarmed with {} instances", self.config.id, missing);
        }
        Ok(missing)
    }

    /// Grows the pool by one step.
    ///
    /// Returns how many instances were added (0 when already at capacity).
    ///
    /// # Errors
    ///
    /// Returns `FactoryFailure` if the factory fails mid-step; instances
    /// created before the failure stay in the pool.
    pub fn expand(&mut self, now: Duration) -> PoolResult<usize> {
        let size = self.size();
        let room = self.config.max_size.saturating_sub(size);
        let growth = self.growth_step(size).min(room);
        if growth == 0 {
            return Ok(0);
        }

        for created in 0..growth {
            if let Err(err) = self.create_one(now) {
                if created > 0 {
                    self.expansion_count += 1;
                }
                return Err(err);
            }
        }
        self.expansion_count += 1;

        tracing::debug!(
            "pool {} expanded {} -> {} (max {})",
            self.config.id,
            size,
            size + growth,
            self.config.max_size
        );
        Ok(growth)
    }

    /// Takes a free instance using the pool's default lifetime.
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` at capacity with nothing free, or
    /// `FactoryFailure` if growing the pool failed.
    pub fn acquire(
        &mut self,
        scheduler: &mut dyn ReleaseScheduler,
        placement: Option<&Placement>,
    ) -> PoolResult<InstanceHandle> {
        let lifetime = self.config.max_lifetime();
        self.acquire_for(scheduler, placement, lifetime)
    }

    /// Takes a free instance that auto-releases after `lifetime`
    /// (`Duration::ZERO` = held until released manually).
    ///
    /// # Errors
    ///
    /// Same as [`Pool::acquire`].
    pub fn acquire_for(
        &mut self,
        scheduler: &mut dyn ReleaseScheduler,
        placement: Option<&Placement>,
        lifetime: Duration,
    ) -> PoolResult<InstanceHandle> {
        let now = scheduler.now();
        let index = self.pop_free(now)?;

        let slot = &mut self.slots[index as usize];
        let handle = InstanceHandle::new(self.key, index, slot.generation);
        let Some(instance) = slot.entry.as_mut() else {
            return Err(self.exhausted());
        };

        instance.touch(now);
        if let Some(placement) = placement {
            self.factory.place(instance.value_mut(), placement);
        }
        instance.notify_acquire();

        if !lifetime.is_zero() {
            let token = scheduler.schedule_after(lifetime, ReleaseTicket { handle });
            if let Some(stale) = instance.arm(token) {
                scheduler.cancel(stale);
            }
        }

        self.active.insert(index);
        self.peak_active = self.peak_active.max(self.active.len());
        Ok(handle)
    }

    /// Returns an acquisition to the free list.
    ///
    /// Idempotent: a handle that is stale, foreign or already released is
    /// ignored. Returns whether anything was released.
    pub fn release(&mut self, scheduler: &mut dyn ReleaseScheduler, handle: InstanceHandle) -> bool {
        if handle.pool() != self.key {
            tracing::warn!(
                "pool {} ignored a handle owned by {}",
                self.config.id,
                handle.pool()
            );
            return false;
        }
        if !self.is_active(handle) {
            tracing::debug!(
                "pool {} ignored release of inactive slot {}",
                self.config.id,
                handle.slot()
            );
            return false;
        }

        let index = handle.slot();
        let slot = &mut self.slots[index as usize];
        if let Some(instance) = slot.entry.as_mut() {
            if let Some(token) = instance.disarm() {
                scheduler.cancel(token);
            }
            instance.notify_release();
            instance.touch(scheduler.now());
        }
        slot.generation = slot.generation.wrapping_add(1);

        self.active.remove(&index);
        self.free.push(index);
        true
    }

    /// Drops every entry whose resource was invalidated outside the pool.
    ///
    /// Returns how many entries were removed.
    pub fn defragment(&mut self, scheduler: &mut dyn ReleaseScheduler) -> usize {
        let mut removed = 0;

        let free = std::mem::take(&mut self.free);
        let mut kept = Vec::with_capacity(free.len());
        for index in free {
            if self.is_slot_alive(index) {
                kept.push(index);
            } else {
                self.untrack(index);
                removed += 1;
            }
        }
        self.free = kept;

        let dead: Vec<u32> = self
            .active
            .iter()
            .copied()
            .filter(|&index| !self.is_slot_alive(index))
            .collect();
        for index in dead {
            self.active.remove(&index);
            if let Some(mut instance) = self.untrack(index) {
                if let Some(token) = instance.disarm() {
                    scheduler.cancel(token);
                }
            }
            removed += 1;
        }

        self.defrag_count += 1;
        tracing::debug!(
            "pool {} defragmented: {} dead entries dropped, {} tracked",
            self.config.id,
            removed,
            self.size()
        );
        removed
    }

    /// Destroys free instances idle for at least `shrink_after`, never
    /// shrinking below `initial_size`. Least recently used go first.
    ///
    /// Returns how many instances were destroyed.
    pub fn trim_idle(&mut self, now: Duration) -> usize {
        let threshold = self.config.shrink_after();
        if threshold.is_zero() {
            return 0;
        }
        let mut excess = self.size().saturating_sub(self.config.initial_size);
        if excess == 0 {
            return 0;
        }

        let free = std::mem::take(&mut self.free);
        let mut kept = Vec::with_capacity(free.len());
        let mut trimmed = 0;
        for index in free {
            let idle = excess > 0
                && self.slots[index as usize]
                    .entry
                    .as_ref()
                    .is_some_and(|e| now.saturating_sub(e.last_used()) >= threshold);
            if idle {
                if let Some(instance) = self.untrack(index) {
                    self.dispose(instance);
                }
                excess -= 1;
                trimmed += 1;
            } else {
                kept.push(index);
            }
        }
        self.free = kept;

        if trimmed > 0 {
            tracing::debug!("pool {} trimmed {} idle instances", self.config.id, trimmed);
        }
        trimmed
    }

    /// Empties the pool.
    ///
    /// Free instances are destroyed through the factory. Active instances
    /// are detached without being destroyed and handed back, each paired
    /// with the handle its holder was given, so the holder can reclaim or
    /// destroy it. Pending auto-releases are cancelled and all counters
    /// reset.
    pub fn clear(&mut self, scheduler: &mut dyn ReleaseScheduler) -> Vec<(InstanceHandle, T)> {
        for index in std::mem::take(&mut self.free) {
            if let Some(instance) = self.untrack(index) {
                self.dispose(instance);
            }
        }

        let active = std::mem::take(&mut self.active);
        let mut detached = Vec::with_capacity(active.len());
        for index in active {
            let handle = InstanceHandle::new(self.key, index, self.slots[index as usize].generation);
            if let Some(mut instance) = self.untrack(index) {
                if let Some(token) = instance.disarm() {
                    scheduler.cancel(token);
                }
                detached.push((handle, instance.into_value()));
            }
        }

        self.total_created = 0;
        self.peak_active = 0;
        self.expansion_count = 0;
        self.defrag_count = 0;

        tracing::debug!(
            "pool {} cleared, {} active instances detached",
            self.config.id,
            detached.len()
        );
        detached
    }

    /// Creates one instance onto the free list.
    fn create_one(&mut self, now: Duration) -> PoolResult<u32> {
        let value = self
            .factory
            .create()
            .map_err(|e| self.factory_failure(e.reason))?;
        if !self.factory.is_alive(&value) {
            return Err(self.factory_failure("factory produced a dead instance".to_string()));
        }

        let listeners = self.factory.listeners(&value);
        let instance = ResettableInstance::new(value, self.key, now, listeners);

        let index = if let Some(index) = self.vacant.pop() {
            self.slots[index as usize].entry = Some(instance);
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(instance),
            });
            index
        };

        self.free.push(index);
        self.total_created += 1;
        Ok(index)
    }

    /// Pops a live free slot, growing the pool when the free list is empty.
    /// Dead entries met on the way are dropped.
    fn pop_free(&mut self, now: Duration) -> PoolResult<u32> {
        loop {
            if self.free.is_empty() {
                if self.size() >= self.config.max_size || self.expand(now)? == 0 {
                    return Err(self.exhausted());
                }
            }

            while let Some(index) = self.free.pop() {
                if self.is_slot_alive(index) {
                    return Ok(index);
                }
                self.untrack(index);
                tracing::debug!(
                    "pool {} dropped dead free slot {} on acquire",
                    self.config.id,
                    index
                );
            }
        }
    }

    /// Growth for one expansion step, before clamping to capacity.
    fn growth_step(&self, size: usize) -> usize {
        let step = (size as f64 * f64::from(self.config.expansion_rate)).floor() as usize;
        step.max(1)
    }

    fn is_slot_alive(&self, index: u32) -> bool {
        self.slots[index as usize]
            .entry
            .as_ref()
            .is_some_and(|e| self.factory.is_alive(e.value()))
    }

    fn dead_count(&self) -> usize {
        self.free
            .iter()
            .chain(self.active.iter())
            .filter(|&&index| !self.is_slot_alive(index))
            .count()
    }

    /// Removes a slot's entry and ends its current acquisition.
    /// The caller removes the index from `free`/`active`.
    fn untrack(&mut self, index: u32) -> Option<ResettableInstance<T>> {
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        if entry.is_some() {
            self.vacant.push(index);
        }
        entry
    }

    /// Destroys an untracked instance unless the host already did.
    fn dispose(&self, instance: ResettableInstance<T>) {
        if self.factory.is_alive(instance.value()) {
            self.factory.destroy(instance.into_value());
        }
    }

    fn exhausted(&self) -> PoolError {
        PoolError::Exhausted {
            pool: self.config.id.clone(),
            capacity: self.config.max_size,
        }
    }

    fn factory_failure(&self, reason: String) -> PoolError {
        PoolError::FactoryFailure {
            pool: self.config.id.clone(),
            reason,
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("key", &self.key)
            .field("id", &self.config.id)
            .field("free", &self.free.len())
            .field("active", &self.active.len())
            .field("max_size", &self.config.max_size)
            .finish_non_exhaustive()
    }
}
