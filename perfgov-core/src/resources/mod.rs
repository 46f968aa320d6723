//! # Resource Management
//!
//! Bounded object pools, a bounded retention cache for large objects,
//! memoization helpers, and memory-pressure-triggered cleanup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{validate_non_zero, validate_ratio, validation_error, ValidateConfig};
use crate::error::Result;

pub mod governor;
pub mod memo;
pub mod memory;
pub mod pool;
pub mod retention;

pub use governor::{CleanupReport, MemoryReport, MemoryUsage, Reclaimable, ResourceGovernor};
pub use memo::{LazyLoader, Memoizer};
pub use memory::{FixedMemoryProbe, MemoryProbe, ProcessMemoryProbe};
pub use pool::{ObjectPools, Poolable};
pub use retention::RetentionCache;

const MIB: u64 = 1024 * 1024;

/// One memory usage sample, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
}

impl MemorySample {
    pub fn rss_mib(&self) -> f64 {
        self.rss_bytes as f64 / MIB as f64
    }
}

/// Resource governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Free objects kept per pool kind
    pub pool_capacity: usize,
    /// Objects left per pool after a cleanup
    pub pool_residual: usize,
    /// Memory threshold (MiB)
    pub memory_threshold_mb: u64,
    /// Minimum time between automatic cleanups (s)
    pub cleanup_interval_secs: u64,
    /// Automatic cleanup runs above this share of the threshold
    pub cleanup_trigger_ratio: f64,
    /// Entries kept by the retention cache
    pub retention_capacity: usize,
    /// Retention entries left after a cleanup
    pub retention_residual: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 100,
            pool_residual: 10,
            memory_threshold_mb: 100,
            cleanup_interval_secs: 60,
            cleanup_trigger_ratio: 0.8,
            retention_capacity: 256,
            retention_residual: 32,
        }
    }
}

impl ResourceConfig {
    pub fn memory_threshold_bytes(&self) -> u64 {
        self.memory_threshold_mb.saturating_mul(MIB)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl ValidateConfig for ResourceConfig {
    fn validate(&self) -> Result<()> {
        validate_non_zero(self.pool_capacity as u64, "resources.pool_capacity")?;
        validate_non_zero(self.memory_threshold_mb, "resources.memory_threshold_mb")?;
        validate_non_zero(self.cleanup_interval_secs, "resources.cleanup_interval_secs")?;
        validate_non_zero(self.retention_capacity as u64, "resources.retention_capacity")?;
        validate_ratio(self.cleanup_trigger_ratio, "resources.cleanup_trigger_ratio")?;

        if self.pool_residual > self.pool_capacity {
            return Err(validation_error(
                "resources.pool_residual cannot exceed resources.pool_capacity",
            ));
        }
        if self.retention_residual > self.retention_capacity {
            return Err(validation_error(
                "resources.retention_residual cannot exceed resources.retention_capacity",
            ));
        }
        Ok(())
    }
}
