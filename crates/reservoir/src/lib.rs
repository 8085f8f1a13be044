//! # RESERVOIR
//!
//! Composition root for the pool registry.
//!
//! ## Host Loop
//!
//! ```text
//! Fixed step N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. SPAWN                                                            │
//! │    └─ acquire() from the registry, placement applied by the factory │
//! │                                                                     │
//! │ 2. SIMULATE                                                         │
//! │    ├─ Integrate live projectiles                                    │
//! │    ├─ Release the ones that hit something                           │
//! │    └─ Despawn a few behind the pool's back (external invalidation)  │
//! │                                                                     │
//! │ 3. ADVANCE                                                          │
//! │    ├─ Deliver due auto-releases                                     │
//! │    └─ Run the maintenance tick on its cadence                       │
//! │                                                                     │
//! │ 4. STAGE TRANSITIONS                                                │
//! │    └─ Unload/load: clear then prewarm tier L1                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `sim`: Deterministic projectile simulation

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod sim;

// Re-export the core
pub use reservoir_core as core;

pub use reservoir_core::{
    CacheTier, InstanceHandle, PoolConfig, PoolError, PoolManifest, PoolRegistry, PoolResult,
    RegistryConfig,
};
pub use sim::{Projectile, ProjectileFactory, SimConfig, SimReport, Simulation};
