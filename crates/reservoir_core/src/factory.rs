//! # Collaborator Contracts
//!
//! What a pool needs from the outside world for one resource type: a
//! factory that builds and tears down raw instances, and optional lifecycle
//! listeners that reset an instance when it is handed out or taken back.
//!
//! ```text
//! Pool calls:              Host implements:
//! ┌──────────────────┐    ┌──────────────────────────┐
//! │ create / destroy │ ←─ │ impl InstanceFactory<T>  │
//! │ on_acquire / ... │ ←─ │ impl Lifecycle<T>        │
//! └──────────────────┘    └──────────────────────────┘
//! ```

use crate::error::FactoryError;

/// Where an acquired instance should be put.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    /// World-space position.
    pub position: [f32; 3],
    /// Rotation quaternion (x, y, z, w).
    pub rotation: [f32; 4],
    /// Entity to attach to, if any.
    pub parent: Option<u64>,
}

impl Placement {
    /// Identity rotation.
    pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    /// Placement at `position` with identity rotation and no parent.
    #[must_use]
    pub const fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: Self::IDENTITY_ROTATION,
            parent: None,
        }
    }

    /// Sets the rotation.
    #[must_use]
    pub const fn with_rotation(mut self, rotation: [f32; 4]) -> Self {
        self.rotation = rotation;
        self
    }

    /// Sets the parent entity.
    #[must_use]
    pub const fn with_parent(mut self, parent: u64) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::at([0.0; 3])
    }
}

/// Reset hooks for a pooled instance.
///
/// Both hooks default to no-ops so a listener only implements what it needs.
pub trait Lifecycle<T> {
    /// Called after the instance is taken from the free list.
    fn on_acquire(&mut self, _instance: &mut T) {}

    /// Called before the instance goes back onto the free list.
    fn on_release(&mut self, _instance: &mut T) {}
}

/// Lifecycle listener built from a pair of closures.
pub struct FnLifecycle<A, R> {
    acquire: A,
    release: R,
}

impl<A, R> FnLifecycle<A, R> {
    /// Wraps the two hooks.
    pub const fn new(acquire: A, release: R) -> Self {
        Self { acquire, release }
    }
}

impl<T, A, R> Lifecycle<T> for FnLifecycle<A, R>
where
    A: FnMut(&mut T),
    R: FnMut(&mut T),
{
    fn on_acquire(&mut self, instance: &mut T) {
        (self.acquire)(instance);
    }

    fn on_release(&mut self, instance: &mut T) {
        (self.release)(instance);
    }
}

/// Builds and destroys raw instances of one resource type.
///
/// Factories are shared between every pool that names them, so all
/// methods take `&self`; use interior mutability for counters.
pub trait InstanceFactory<T> {
    /// Creates a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns a `FactoryError` when the resource cannot be built.
    fn create(&self) -> Result<T, FactoryError>;

    /// Destroys an instance the pool no longer tracks.
    fn destroy(&self, instance: T);

    /// Whether the underlying resource still exists.
    ///
    /// The host may tear a resource down behind the pool's back; such
    /// entries are counted as fragmentation and compacted away.
    fn is_alive(&self, _instance: &T) -> bool {
        true
    }

    /// Applies placement params to an instance being acquired.
    fn place(&self, _instance: &mut T, _placement: &Placement) {}

    /// Lifecycle listeners for a freshly created instance.
    ///
    /// Queried once per instance; the result is cached for its lifetime.
    fn listeners(&self, _instance: &T) -> Vec<Box<dyn Lifecycle<T>>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_lifecycle_hooks() {
        let mut listener: Box<dyn Lifecycle<u32>> =
            Box::new(FnLifecycle::new(|v: &mut u32| *v += 1, |v: &mut u32| *v = 0));
        let mut value = 5;

        listener.on_acquire(&mut value);
        assert_eq!(value, 6);

        listener.on_release(&mut value);
        assert_eq!(value, 0);
    }

    #[test]
    fn test_placement_builder() {
        let placement = Placement::at([1.0, 2.0, 3.0]).with_parent(7);
        assert_eq!(placement.position, [1.0, 2.0, 3.0]);
        assert_eq!(placement.rotation, Placement::IDENTITY_ROTATION);
        assert_eq!(placement.parent, Some(7));
        assert_eq!(Placement::default().position, [0.0; 3]);
    }
}
