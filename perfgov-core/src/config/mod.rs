//! # Governor Configuration
//!
//! Unified configuration for every governance component.
//!
//! ## Configuration Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Environment Variables          │
//! │    PERFGOV_DISPATCHER_WORKERS=8         │
//! ├─────────────────────────────────────────┤
//! │         Config File (perfgov.toml)      │
//! │    [dispatcher]                         │
//! │    workers = 8                          │
//! ├─────────────────────────────────────────┤
//! │         Default Values                  │
//! └─────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod loader;

pub use loader::ConfigLoader;

pub use crate::admission::AdmissionConfig;
pub use crate::cache::CacheConfig;
pub use crate::dispatcher::DispatcherConfig;
pub use crate::metrics::MetricsConfig;
pub use crate::resources::ResourceConfig;

use crate::error::{GovernorError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GovernorConfig {
    /// TTL cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Metrics collector configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Rate limiting and throttling configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Worker dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Object pool and memory cleanup configuration
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl GovernorConfig {
    /// Load configuration with full hierarchy (defaults -> file -> env)
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific path
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        ConfigLoader::with_path(path).load()
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.metrics.validate()?;
        self.admission.validate()?;
        self.dispatcher.validate()?;
        self.resources.validate()?;
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GovernorError::serialization(format!("config to toml: {}", e)))
    }
}

/// Trait for configuration validation
pub trait ValidateConfig {
    /// Validate configuration values
    fn validate(&self) -> Result<()>;
}

/// Configuration error helper
pub(crate) fn validation_error(msg: impl Into<String>) -> GovernorError {
    GovernorError::configuration(format!("Validation error: {}", msg.into()))
}

/// Validate a numeric setting is non-zero
pub(crate) fn validate_non_zero(value: u64, name: &str) -> Result<()> {
    if value == 0 {
        return Err(validation_error(format!("{} cannot be zero", name)));
    }
    Ok(())
}

/// Validate a ratio lies in (0, 1]
pub(crate) fn validate_ratio(value: f64, name: &str) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(validation_error(format!(
            "{} must be in (0, 1] (got {})",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = GovernorConfig::default();
        assert_eq!(config.cache.default_ttl_ms, 5 * 60 * 1000);
        assert_eq!(config.metrics.max_samples, 1000);
        assert_eq!(config.admission.max_requests, 100);
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.resources.pool_capacity, 100);
    }

    #[test]
    fn test_config_validate() {
        let config = GovernorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_non_zero() {
        assert!(validate_non_zero(1, "interval").is_ok());
        assert!(validate_non_zero(0, "interval").is_err());
    }

    #[test]
    fn test_validate_ratio() {
        assert!(validate_ratio(0.8, "ratio").is_ok());
        assert!(validate_ratio(1.0, "ratio").is_ok());
        assert!(validate_ratio(0.0, "ratio").is_err());
        assert!(validate_ratio(1.5, "ratio").is_err());
        assert!(validate_ratio(f64::NAN, "ratio").is_err());
    }

    #[test]
    fn test_config_serialize_deserialize() {
        let config = GovernorConfig::default();
        let toml_str = config.to_toml().unwrap();
        let deserialized: GovernorConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(deserialized.cache.default_ttl_ms, config.cache.default_ttl_ms);
        assert_eq!(deserialized.dispatcher.workers, config.dispatcher.workers);
        assert_eq!(
            deserialized.resources.memory_threshold_mb,
            config.resources.memory_threshold_mb
        );
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: GovernorConfig = toml::from_str(
            r#"
            [cache]
            default_ttl_ms = 1000
        "#,
        )
        .unwrap();

        assert_eq!(config.cache.default_ttl_ms, 1000);
        assert!(config.cache.enabled);
        assert_eq!(config.dispatcher.workers, 4);
    }
}
