//! # Metrics Module
//!
//! In-process metrics for the governance layer: timers, counters,
//! width-10 histograms and bounded sample series, plus a line-oriented text
//! export for an external scrape endpoint.
//!
//! ## 示例
//!
//! ```rust
//! use perfgov_core::metrics::{MetricsCollector, MetricsConfig};
//!
//! let metrics = MetricsCollector::new(MetricsConfig::default());
//! metrics.increment_counter("api_requests_total", 1);
//! metrics.record_histogram("api_response_time", 23.0);
//! metrics.record_metric("stats_computation_time", 12.5);
//!
//! let stats = metrics.get_metric_stats("stats_computation_time").unwrap();
//! assert_eq!(stats.count, 1);
//! println!("{}", metrics.export_text());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{validate_non_zero, validation_error, ValidateConfig};
use crate::error::Result;

pub mod collector;
pub mod export;

pub use collector::{MetricSample, MetricStats, MetricsCollector, MetricsSnapshot};
pub use export::sanitize_metric_name;

/// Metrics collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained per series (oldest dropped beyond this)
    pub max_samples: usize,

    /// Raw samples included in a stats summary
    pub recent_samples: usize,

    /// Age after which samples are purged by the collection loop
    pub retention_secs: u64,

    /// Interval of the periodic collection loop
    pub collection_interval_secs: u64,

    /// Requests or computations slower than this are logged
    pub slow_threshold_ms: u64,

    /// Database queries slower than this are logged
    pub slow_query_threshold_ms: u64,

    /// Prefix of every exported line
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples: 1000,
            recent_samples: 10,
            retention_secs: 24 * 60 * 60,
            collection_interval_secs: 60,
            slow_threshold_ms: 1000,
            slow_query_threshold_ms: 500,
            namespace: "perfgov".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

impl ValidateConfig for MetricsConfig {
    fn validate(&self) -> Result<()> {
        validate_non_zero(self.max_samples as u64, "metrics.max_samples")?;
        validate_non_zero(self.retention_secs, "metrics.retention_secs")?;
        validate_non_zero(
            self.collection_interval_secs,
            "metrics.collection_interval_secs",
        )?;
        if self.namespace.is_empty() || sanitize_metric_name(&self.namespace) != self.namespace {
            return Err(validation_error(format!(
                "metrics.namespace must be non-empty [a-zA-Z0-9_] (got '{}')",
                self.namespace
            )));
        }
        Ok(())
    }
}
