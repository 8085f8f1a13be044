//! # Pool Configuration
//!
//! Immutable pool and registry settings. Everything here derives serde so a
//! whole pool layout can be shipped as a TOML manifest and loaded once at
//! startup.
//!
//! ## Manifest Format
//!
//! ```toml
//! [registry]
//! expansion_sensitivity = 0.8
//! maintenance_interval_ms = 1000
//!
//! [[pools]]
//! id = "plasma_bolt"
//! factory = "projectile"
//! initial_size = 32
//! max_size = 256
//! max_lifetime_ms = 2000
//! tier = "l1"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Lifetime scope of a pool.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Scene-scoped: prewarmed on stage load, cleared on stage unload.
    #[default]
    L1,
    /// Process-lifetime: never touched by stage transitions.
    L2,
    /// On-demand large resources: managed only by explicit calls.
    L3,
}

impl CacheTier {
    /// All tiers, in index order.
    pub const ALL: [Self; 3] = [Self::L1, Self::L2, Self::L3];

    /// Dense index of the tier (0..3).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::L1 => 0,
            Self::L2 => 1,
            Self::L3 => 2,
        }
    }
}

/// Configuration of a single pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Unique pool id.
    pub id: String,
    /// Key of the factory that creates and destroys this pool's instances.
    pub factory: String,
    /// Number of instances `prewarm` fills the pool up to.
    #[serde(default)]
    pub initial_size: usize,
    /// Hard ceiling on tracked instances (free + active).
    pub max_size: usize,
    /// Fraction of the current size added per growth step.
    #[serde(default = "default_expansion_rate")]
    pub expansion_rate: f32,
    /// Fraction of dead entries that triggers compaction.
    #[serde(default = "default_fragmentation_threshold")]
    pub fragmentation_threshold: f32,
    /// Default auto-release delay in milliseconds (0 = never).
    #[serde(default)]
    pub max_lifetime_ms: u64,
    /// Lifetime scope of the pool.
    #[serde(default)]
    pub tier: CacheTier,
    /// Whether the pool is prewarmed as soon as it is registered.
    #[serde(default)]
    pub prewarm_on_create: bool,
    /// Per-pool override of the registry's expansion sensitivity.
    #[serde(default)]
    pub expansion_sensitivity: Option<f32>,
    /// Free instances idle for this long are destroyed by maintenance,
    /// down to `initial_size` (0 = never shrink).
    #[serde(default)]
    pub shrink_after_ms: u64,
}

fn default_expansion_rate() -> f32 {
    0.5
}

fn default_fragmentation_threshold() -> f32 {
    0.25
}

impl PoolConfig {
    /// Creates a config with default growth policy and no prewarm.
    #[must_use]
    pub fn new(id: impl Into<String>, factory: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            factory: factory.into(),
            initial_size: 0,
            max_size: 64,
            expansion_rate: default_expansion_rate(),
            fragmentation_threshold: default_fragmentation_threshold(),
            max_lifetime_ms: 0,
            tier: CacheTier::L1,
            prewarm_on_create: false,
            expansion_sensitivity: None,
            shrink_after_ms: 0,
        }
    }

    /// Sets the initial and maximum sizes.
    #[must_use]
    pub const fn with_sizes(mut self, initial_size: usize, max_size: usize) -> Self {
        self.initial_size = initial_size;
        self.max_size = max_size;
        self
    }

    /// Sets the expansion rate.
    #[must_use]
    pub const fn with_expansion_rate(mut self, rate: f32) -> Self {
        self.expansion_rate = rate;
        self
    }

    /// Sets the fragmentation threshold.
    #[must_use]
    pub const fn with_fragmentation_threshold(mut self, threshold: f32) -> Self {
        self.fragmentation_threshold = threshold;
        self
    }

    /// Sets the default auto-release lifetime, rounded up to whole
    /// milliseconds so a non-zero lifetime never turns into "never".
    #[must_use]
    pub const fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime_ms = ceil_millis(lifetime);
        self
    }

    /// Sets the cache tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: CacheTier) -> Self {
        self.tier = tier;
        self
    }

    /// Prewarms the pool on registration.
    #[must_use]
    pub const fn prewarmed(mut self) -> Self {
        self.prewarm_on_create = true;
        self
    }

    /// Overrides the registry-wide expansion sensitivity for this pool.
    #[must_use]
    pub const fn with_expansion_sensitivity(mut self, sensitivity: f32) -> Self {
        self.expansion_sensitivity = Some(sensitivity);
        self
    }

    /// Enables idle shrink after the given duration, rounded up to whole
    /// milliseconds.
    #[must_use]
    pub const fn with_shrink_after(mut self, idle: Duration) -> Self {
        self.shrink_after_ms = ceil_millis(idle);
        self
    }

    /// Default auto-release lifetime (`Duration::ZERO` = never).
    #[inline]
    #[must_use]
    pub const fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Idle duration after which free instances may be trimmed.
    #[inline]
    #[must_use]
    pub const fn shrink_after(&self) -> Duration {
        Duration::from_millis(self.shrink_after_ms)
    }

    /// Checks the config for values no pool can operate with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> PoolResult<()> {
        if self.id.is_empty() {
            return Err(PoolError::InvalidConfig("pool id must not be empty".to_string()));
        }
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool {}: max_size must be greater than zero",
                self.id
            )));
        }
        if self.initial_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "pool {}: initial_size {} exceeds max_size {}",
                self.id, self.initial_size, self.max_size
            )));
        }
        if !self.expansion_rate.is_finite() || self.expansion_rate < 0.0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool {}: expansion_rate must be a non-negative number",
                self.id
            )));
        }
        check_fraction(&self.id, "fragmentation_threshold", self.fragmentation_threshold)?;
        if let Some(sensitivity) = self.expansion_sensitivity {
            check_fraction(&self.id, "expansion_sensitivity", sensitivity)?;
        }
        Ok(())
    }
}

/// Whole milliseconds in `duration`, rounding any remainder up and
/// saturating at `u64::MAX`.
const fn ceil_millis(duration: Duration) -> u64 {
    let mut ms = duration.as_millis();
    if duration.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    if ms > u64::MAX as u128 {
        u64::MAX
    } else {
        ms as u64
    }
}

fn check_fraction(owner: &str, field: &str, value: f32) -> PoolResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PoolError::InvalidConfig(format!(
            "{owner}: {field} must be within [0, 1], got {value}"
        )))
    }
}

/// Registry-wide settings and the defaults used for pools the registry
/// synthesizes on demand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Pools whose idle rate drops below `1 - sensitivity` grow proactively.
    pub expansion_sensitivity: f32,
    /// Cadence of the maintenance tick when driven by `advance`.
    pub maintenance_interval_ms: u64,
    /// Initial size of synthesized pools.
    pub default_initial_size: usize,
    /// Maximum size of synthesized pools.
    pub default_max_size: usize,
    /// Expansion rate of synthesized pools.
    pub default_expansion_rate: f32,
    /// Fragmentation threshold of synthesized pools.
    pub default_fragmentation_threshold: f32,
    /// Auto-release lifetime of synthesized pools (0 = never).
    pub default_max_lifetime_ms: u64,
    /// Tier of pools synthesized by `acquire` on an unseen factory key.
    pub default_tier: CacheTier,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            expansion_sensitivity: 0.8,
            maintenance_interval_ms: 1000,
            default_initial_size: 8,
            default_max_size: 64,
            default_expansion_rate: default_expansion_rate(),
            default_fragmentation_threshold: default_fragmentation_threshold(),
            default_max_lifetime_ms: 0,
            default_tier: CacheTier::L1,
        }
    }
}

impl RegistryConfig {
    /// Maintenance cadence.
    #[inline]
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Checks the registry settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> PoolResult<()> {
        check_fraction("registry", "expansion_sensitivity", self.expansion_sensitivity)?;
        check_fraction(
            "registry",
            "default_fragmentation_threshold",
            self.default_fragmentation_threshold,
        )?;
        if self.maintenance_interval_ms == 0 {
            return Err(PoolError::InvalidConfig(
                "registry: maintenance_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_max_size == 0 || self.default_initial_size > self.default_max_size {
            return Err(PoolError::InvalidConfig(format!(
                "registry: default sizes {}/{} are not usable",
                self.default_initial_size, self.default_max_size
            )));
        }
        Ok(())
    }

    /// Builds the config of a pool synthesized for `factory`.
    #[must_use]
    pub fn synthesize(
        &self,
        id: String,
        factory: &str,
        initial_size: usize,
        max_size: usize,
        tier: CacheTier,
    ) -> PoolConfig {
        PoolConfig {
            id,
            factory: factory.to_string(),
            initial_size,
            max_size,
            expansion_rate: self.default_expansion_rate,
            fragmentation_threshold: self.default_fragmentation_threshold,
            max_lifetime_ms: self.default_max_lifetime_ms,
            tier,
            prewarm_on_create: false,
            expansion_sensitivity: None,
            shrink_after_ms: 0,
        }
    }
}

/// A full pool layout: registry settings plus the pools to register.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolManifest {
    /// Registry-wide settings.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Pools to register at startup.
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

impl PoolManifest {
    /// Parses and validates a manifest from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> PoolResult<Self> {
        let manifest: Self =
            toml::from_str(text).map_err(|e| PoolError::InvalidConfig(e.to_string()))?;
        manifest.registry.validate()?;
        for pool in &manifest.pools {
            pool.validate()?;
        }
        Ok(manifest)
    }

    /// Reads a manifest from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PoolError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}
