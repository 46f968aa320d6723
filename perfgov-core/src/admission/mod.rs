//! # Admission Control
//!
//! Gate in front of the request handlers: a per-client sliding-window rate
//! limit, plus throttling of heavy analytics routes so that bursts for the
//! same route coalesce into one handler invocation per window.
//!
//! ## Usage
//!
//! ```rust
//! use perfgov_core::admission::{Admission, AdmissionConfig, AdmissionControl};
//! use perfgov_core::metrics::MetricsCollector;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(MetricsCollector::default());
//! let control = AdmissionControl::new(AdmissionConfig::default(), metrics);
//!
//! match control.admit("10.0.0.7", "/api/analytics/overview").unwrap() {
//!     Admission::Proceed => {}
//!     Admission::Throttled(key) => {
//!         let handler = control.throttle(&key, || json!({"status": "ok"}));
//!         assert_eq!(handler.call()["status"], "ok");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::{validate_non_zero, validation_error, ValidateConfig};
use crate::error::Result;
use crate::metrics::MetricsCollector;

pub mod rate_limiter;
pub mod throttle;

pub use rate_limiter::RateLimiter;
pub use throttle::{Throttle, ThrottledFn};

/// Admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Requests allowed per client per window
    pub max_requests: usize,
    /// Rate window length (ms)
    pub window_ms: u64,
    /// Throttle window for heavy routes (ms)
    pub throttle_delay_ms: u64,
    /// Routes whose path contains this marker are throttled
    pub throttle_path_marker: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            throttle_delay_ms: 1000,
            throttle_path_marker: "analytics".to_string(),
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }
}

impl ValidateConfig for AdmissionConfig {
    fn validate(&self) -> Result<()> {
        validate_non_zero(self.max_requests as u64, "admission.max_requests")?;
        validate_non_zero(self.window_ms, "admission.window_ms")?;
        validate_non_zero(self.throttle_delay_ms, "admission.throttle_delay_ms")?;
        if self.throttle_path_marker.is_empty() {
            return Err(validation_error(
                "admission.throttle_path_marker cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Outcome of a successful admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Run the handler directly
    Proceed,
    /// Run the handler through [`AdmissionControl::throttle`] with this key
    Throttled(String),
}

/// Rate limiter + throttle with the configured budgets
#[derive(Debug)]
pub struct AdmissionControl {
    config: AdmissionConfig,
    limiter: RateLimiter,
    throttle: Throttle<Value>,
    metrics: Arc<MetricsCollector>,
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            limiter: RateLimiter::new(),
            throttle: Throttle::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Check an inbound request from `client_key` for `path`
    ///
    /// Fails with `RateLimitExceeded` once the client used its budget.
    pub fn admit(&self, client_key: &str, path: &str) -> Result<Admission> {
        if let Err(e) = self
            .limiter
            .check(client_key, self.config.max_requests, self.config.window())
        {
            self.metrics.increment_counter("admission_rejected", 1);
            return Err(e);
        }

        if path.contains(self.config.throttle_path_marker.as_str()) {
            debug!("Throttling heavy route {}", path);
            return Ok(Admission::Throttled(path.to_string()));
        }

        Ok(Admission::Proceed)
    }

    /// Coalesce `handler` under `key` for the configured throttle window
    pub fn throttle<F>(&self, key: &str, handler: F) -> ThrottledFn<Value>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.throttle
            .throttle(key, handler, self.config.throttle_delay())
    }

    /// Drop idle rate windows and expired throttle slots
    pub fn sweep(&self) -> (usize, usize) {
        (self.limiter.purge_idle(), self.throttle.purge_expired())
    }

    /// Forget all rate windows and throttle slots
    pub fn clear(&self) {
        self.limiter.clear();
        self.throttle.clear();
    }
}
