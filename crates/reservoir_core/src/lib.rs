//! # RESERVOIR Core
//!
//! Tiered, adaptively-sized pools of reusable instances for short-lived
//! entities (projectiles, transient effects, spawned agents) in a
//! fixed-step game loop.
//!
//! ## Architecture Rules
//!
//! 1. **Single writer** - Everything runs on the host loop's thread; nothing
//!    here locks
//! 2. **Never past capacity** - `acquire` fails with `Exhausted` instead of
//!    growing beyond `max_size`
//! 3. **Single-use handles** - A handle (and the auto-release timer armed for
//!    it) is valid for exactly one acquisition
//! 4. **No globals** - The registry is built by the composition root and
//!    passed around by reference
//!
//! ## Example
//!
//! ```rust,ignore
//! use reservoir_core::{PoolConfig, PoolRegistry, RegistryConfig, Placement};
//!
//! let mut registry = PoolRegistry::new(RegistryConfig::default())?;
//! registry.register_factory("projectile", ProjectileFactory::default());
//! registry.create_pool(PoolConfig::new("plasma_bolt", "projectile").with_sizes(32, 256))?;
//!
//! let bolt = registry.acquire("plasma_bolt", Some(&Placement::at([0.0, 1.0, 0.0])))?;
//! registry.release(bolt)?;
//!
//! // Once per fixed step: fire due auto-releases, run maintenance on cadence.
//! registry.advance(step);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod factory;
pub mod instance;
pub mod pool;
pub mod registry;
pub mod schedule;
pub mod window;

pub use config::{CacheTier, PoolConfig, PoolManifest, RegistryConfig};
pub use error::{FactoryError, PoolError, PoolResult};
pub use factory::{FnLifecycle, InstanceFactory, Lifecycle, Placement};
pub use instance::{InstanceHandle, PoolKey, ResettableInstance};
pub use pool::{Pool, PoolStats};
pub use registry::{MaintenanceReport, PoolRegistry, StepReport};
pub use schedule::{CancelToken, ReleaseScheduler, ReleaseTicket, TickScheduler};
pub use window::{RequestWindow, REQUEST_WINDOW_CAPACITY};
