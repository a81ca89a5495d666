//! # Allocator Configuration
//!
//! Allocator setup is data, loaded once at startup from TOML:
//!
//! ```toml
//! [pool]
//! block_size = 64
//! block_align = 16
//! block_count = 4096
//!
//! [tracking]
//! enabled = true
//! live_limit = 100000
//! ```

use serde::{Deserialize, Serialize};

use crate::allocator::Allocator;
use crate::error::{ConfigError, ConfigResult};
use crate::pool::PoolAllocator;

/// Top-level allocator configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocConfig {
    /// Optional fixed-block pool.
    pub pool: Option<PoolConfig>,
    /// Instrumentation settings.
    pub tracking: TrackingConfig,
}

/// Shape of a [`PoolAllocator`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Largest request one block can hold, in bytes.
    pub block_size: usize,
    /// Alignment of every block; must be a power of two.
    #[serde(default = "PoolConfig::default_align")]
    pub block_align: usize,
    /// Number of blocks.
    pub block_count: usize,
}

/// Settings for [`TrackingAllocator`](crate::TrackingAllocator).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// Whether allocations should be routed through a tracking wrapper.
    pub enabled: bool,
    /// Maximum number of simultaneously live allocations.
    pub live_limit: Option<usize>,
}

impl AllocConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for values no allocator can honour.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(pool) = &self.pool {
            pool.validate()?;
        }
        if self.tracking.live_limit.is_some() && !self.tracking.enabled {
            return Err(ConfigError::Invalid(
                "tracking.live_limit requires tracking.enabled".into(),
            ));
        }
        Ok(())
    }
}

impl PoolConfig {
    const fn default_align() -> usize {
        16
    }

    /// Checks the pool shape.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero block size or a
    /// non-power-of-two alignment.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("pool.block_size must be non-zero".into()));
        }
        if !self.block_align.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "pool.block_align must be a power of two, got {}",
                self.block_align
            )));
        }
        Ok(())
    }

    /// Builds the described pool on top of `backing`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the shape is invalid and
    /// [`ConfigError::Build`] if the backing memory cannot be allocated.
    pub fn build(&self, backing: &'static dyn Allocator) -> ConfigResult<PoolAllocator> {
        self.validate()?;
        Ok(PoolAllocator::new(
            backing,
            self.block_size,
            self.block_align,
            self.block_count,
        )?)
    }
}
