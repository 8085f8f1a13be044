//! # Pooled Instances
//!
//! A raw instance wrapped with the bookkeeping its pool needs, plus the
//! handles consumers hold while an instance is active.

use std::fmt;
use std::time::Duration;

use crate::factory::Lifecycle;
use crate::schedule::CancelToken;

/// Registry-assigned key of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(u32);

impl PoolKey {
    /// Wraps a raw key.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw key value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The key as a dense index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Handle to one acquisition of a pooled instance.
///
/// The generation makes the handle single-use: once the acquisition ends
/// (release, auto-release, clear or compaction) the handle goes stale and
/// every operation on it is a no-op, even if the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    pool: PoolKey,
    slot: u32,
    generation: u32,
}

impl InstanceHandle {
    pub(crate) const fn new(pool: PoolKey, slot: u32, generation: u32) -> Self {
        Self {
            pool,
            slot,
            generation,
        }
    }

    /// The owning pool.
    #[inline]
    #[must_use]
    pub const fn pool(self) -> PoolKey {
        self.pool
    }

    /// Slot index inside the pool.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Acquisition generation of the slot.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// A raw instance plus its pool bookkeeping.
///
/// Created once by the pool's factory; bound to that pool for life.
pub struct ResettableInstance<T> {
    value: T,
    owner: PoolKey,
    created_at: Duration,
    last_used: Duration,
    release_token: Option<CancelToken>,
    listeners: Vec<Box<dyn Lifecycle<T>>>,
}

impl<T> ResettableInstance<T> {
    /// Wraps a freshly created instance.
    pub(crate) fn new(
        value: T,
        owner: PoolKey,
        now: Duration,
        listeners: Vec<Box<dyn Lifecycle<T>>>,
    ) -> Self {
        Self {
            value,
            owner,
            created_at: now,
            last_used: now,
            release_token: None,
            listeners,
        }
    }

    /// The wrapped instance.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &T {
        &self.value
    }

    /// The wrapped instance, mutably.
    #[inline]
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Pool this instance belongs to.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> PoolKey {
        self.owner
    }

    /// Host time at which the factory created the instance.
    #[inline]
    #[must_use]
    pub const fn created_at(&self) -> Duration {
        self.created_at
    }

    /// Host time of the last acquire or release.
    #[inline]
    #[must_use]
    pub const fn last_used(&self) -> Duration {
        self.last_used
    }

    /// Pending auto-release, if one is armed.
    #[inline]
    #[must_use]
    pub const fn release_token(&self) -> Option<CancelToken> {
        self.release_token
    }

    /// Whether any lifecycle listener is attached.
    #[inline]
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Arms an auto-release, returning the token it replaces.
    pub(crate) fn arm(&mut self, token: CancelToken) -> Option<CancelToken> {
        self.release_token.replace(token)
    }

    /// Takes the pending auto-release token, if any.
    pub(crate) fn disarm(&mut self) -> Option<CancelToken> {
        self.release_token.take()
    }

    pub(crate) fn touch(&mut self, now: Duration) {
        self.last_used = now;
    }

    pub(crate) fn notify_acquire(&mut self) {
        for listener in &mut self.listeners {
            listener.on_acquire(&mut self.value);
        }
    }

    pub(crate) fn notify_release(&mut self) {
        for listener in &mut self.listeners {
            listener.on_release(&mut self.value);
        }
    }

    /// Unwraps the raw instance, dropping the bookkeeping.
    pub(crate) fn into_value(self) -> T {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ResettableInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResettableInstance")
            .field("value", &self.value)
            .field("owner", &self.owner)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .field("release_token", &self.release_token)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::FnLifecycle;

    #[test]
    fn test_listeners_run_in_order() {
        let listeners: Vec<Box<dyn Lifecycle<Vec<u8>>>> = vec![
            Box::new(FnLifecycle::new(|v: &mut Vec<u8>| v.push(1), |v: &mut Vec<u8>| v.clear())),
            Box::new(FnLifecycle::new(|v: &mut Vec<u8>| v.push(2), |_: &mut Vec<u8>| {})),
        ];
        let mut instance =
            ResettableInstance::new(Vec::new(), PoolKey::from_raw(3), Duration::ZERO, listeners);

        assert!(instance.has_listeners());
        instance.notify_acquire();
        assert_eq!(instance.value(), &vec![1, 2]);

        instance.notify_release();
        assert!(instance.value().is_empty());
    }

    #[test]
    fn test_arm_replaces_token() {
        let mut instance =
            ResettableInstance::new(0u8, PoolKey::from_raw(0), Duration::from_secs(1), Vec::new());
        assert!(instance.arm(CancelToken::from_raw(1)).is_none());
        assert_eq!(instance.arm(CancelToken::from_raw(2)), Some(CancelToken::from_raw(1)));
        assert_eq!(instance.disarm(), Some(CancelToken::from_raw(2)));
        assert!(instance.release_token().is_none());

        instance.touch(Duration::from_secs(4));
        assert_eq!(instance.created_at(), Duration::from_secs(1));
        assert_eq!(instance.last_used(), Duration::from_secs(4));
        assert_eq!(instance.owner().to_string(), "pool#0");
    }
}
