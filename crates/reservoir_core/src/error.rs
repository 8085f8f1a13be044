//! # Pool Error Types
//!
//! All errors that can occur in the pool system. Every one of them is a
//! local, recoverable condition returned to the immediate caller; none of
//! them is allowed to take down the host loop.

use thiserror::Error;

/// Errors that can occur in the pool system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool reached its capacity and has no free instance left.
    #[error("pool exhausted: {pool} is at capacity {capacity} with no free instance")]
    Exhausted {
        /// Id of the exhausted pool.
        pool: String,
        /// The pool's maximum size.
        capacity: usize,
    },

    /// A pool with this id is already registered.
    #[error("duplicate pool id: {0}")]
    DuplicatePoolId(String),

    /// No pool is registered under this id, factory key or pool key.
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    /// No factory is registered under this key.
    #[error("unknown factory: {0}")]
    UnknownFactory(String),

    /// The factory could not produce a usable instance.
    #[error("factory failure in pool {pool}: {reason}")]
    FactoryFailure {
        /// Id of the pool that tried to grow.
        pool: String,
        /// What the factory reported.
        reason: String,
    },

    /// Invalid pool or registry configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Returns true for conditions a caller is expected to absorb by
    /// dropping or retrying the spawn request.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Error reported by an instance factory when `create` fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct FactoryError {
    /// Human-readable failure reason.
    pub reason: String,
}

impl FactoryError {
    /// Creates a factory error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
