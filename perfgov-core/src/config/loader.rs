//! # Configuration Loader
//!
//! Loads and merges configuration from multiple sources:
//! 1. Default values (lowest priority)
//! 2. Configuration file (middle priority)
//! 3. Environment variables (highest priority)

use std::env;
use std::path::{Path, PathBuf};

use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};

/// Configuration loader with support for file and environment variable overrides
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Path to configuration file
    config_path: PathBuf,

    /// Environment variable prefix
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: "PERFGOV".to_string(),
        }
    }
}

impl ConfigLoader {
    /// Create a new config loader with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config loader with a specific config file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            env_prefix: "PERFGOV".to_string(),
        }
    }

    /// Override the environment variable prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Path the loader reads the file layer from
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the default configuration file path
    fn default_config_path() -> PathBuf {
        if let Ok(config_path) = env::var("PERFGOV_CONFIG") {
            return PathBuf::from(config_path);
        }

        let possible_paths = [
            PathBuf::from("perfgov.toml"),
            PathBuf::from("config/perfgov.toml"),
            PathBuf::from("/etc/perfgov/perfgov.toml"),
        ];

        for path in &possible_paths {
            if path.exists() {
                return path.clone();
            }
        }

        possible_paths[0].clone()
    }

    /// Load configuration with full hierarchy
    pub fn load(&self) -> Result<GovernorConfig> {
        self.load_with_env(|name| env::var(name).ok())
    }

    /// Load configuration reading environment overrides through `lookup`
    pub fn load_with_env<F>(&self, lookup: F) -> Result<GovernorConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if self.config_path.exists() {
            self.load_from_file()?
        } else {
            tracing::debug!(
                "Config file '{}' not found, using defaults",
                self.config_path.display()
            );
            GovernorConfig::default()
        };

        self.merge_env_config(&mut config, lookup)?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from file
    fn load_from_file(&self) -> Result<GovernorConfig> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            GovernorError::configuration(format!(
                "Failed to read config file '{}': {}",
                self.config_path.display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            GovernorError::configuration(format!(
                "Failed to parse config file '{}': {}",
                self.config_path.display(),
                e
            ))
        })
    }

    /// Merge environment variables into configuration
    fn merge_env_config<F>(&self, config: &mut GovernorConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}_{}", self.env_prefix, suffix));

        // Cache
        if let Some(val) = var("CACHE_ENABLED") {
            config.cache.enabled = parse_bool(&val, "CACHE_ENABLED")?;
        }
        if let Some(val) = var("CACHE_DEFAULT_TTL_MS") {
            config.cache.default_ttl_ms = parse_u64(&val, "CACHE_DEFAULT_TTL_MS")?;
        }
        if let Some(val) = var("CACHE_SWEEP_INTERVAL_MS") {
            config.cache.sweep_interval_ms = parse_u64(&val, "CACHE_SWEEP_INTERVAL_MS")?;
        }
        if let Some(val) = var("CACHE_OPTIMIZE_INTERVAL_SECS") {
            config.cache.optimize_interval_secs =
                parse_u64(&val, "CACHE_OPTIMIZE_INTERVAL_SECS")?;
        }

        // Metrics
        if let Some(val) = var("METRICS_MAX_SAMPLES") {
            config.metrics.max_samples = parse_usize(&val, "METRICS_MAX_SAMPLES")?;
        }
        if let Some(val) = var("METRICS_RETENTION_SECS") {
            config.metrics.retention_secs = parse_u64(&val, "METRICS_RETENTION_SECS")?;
        }
        if let Some(val) = var("METRICS_NAMESPACE") {
            config.metrics.namespace = val;
        }
        if let Some(val) = var("METRICS_SLOW_QUERY_THRESHOLD_MS") {
            config.metrics.slow_query_threshold_ms =
                parse_u64(&val, "METRICS_SLOW_QUERY_THRESHOLD_MS")?;
        }

        // Admission
        if let Some(val) = var("ADMISSION_MAX_REQUESTS") {
            config.admission.max_requests = parse_usize(&val, "ADMISSION_MAX_REQUESTS")?;
        }
        if let Some(val) = var("ADMISSION_WINDOW_MS") {
            config.admission.window_ms = parse_u64(&val, "ADMISSION_WINDOW_MS")?;
        }
        if let Some(val) = var("ADMISSION_THROTTLE_DELAY_MS") {
            config.admission.throttle_delay_ms = parse_u64(&val, "ADMISSION_THROTTLE_DELAY_MS")?;
        }

        // Dispatcher
        if let Some(val) = var("DISPATCHER_WORKERS") {
            config.dispatcher.workers = parse_usize(&val, "DISPATCHER_WORKERS")?;
        }
        if let Some(val) = var("DISPATCHER_BATCH_SIZE") {
            config.dispatcher.batch_size = parse_usize(&val, "DISPATCHER_BATCH_SIZE")?;
        }
        if let Some(val) = var("DISPATCHER_TASK_TIMEOUT_MS") {
            let ms = parse_u64(&val, "DISPATCHER_TASK_TIMEOUT_MS")?;
            config.dispatcher.task_timeout_ms = (ms > 0).then_some(ms);
        }

        // Resources
        if let Some(val) = var("RESOURCES_MEMORY_THRESHOLD_MB") {
            config.resources.memory_threshold_mb =
                parse_u64(&val, "RESOURCES_MEMORY_THRESHOLD_MB")?;
        }
        if let Some(val) = var("RESOURCES_CLEANUP_INTERVAL_SECS") {
            config.resources.cleanup_interval_secs =
                parse_u64(&val, "RESOURCES_CLEANUP_INTERVAL_SECS")?;
        }
        if let Some(val) = var("RESOURCES_POOL_CAPACITY") {
            config.resources.pool_capacity = parse_usize(&val, "RESOURCES_POOL_CAPACITY")?;
        }

        Ok(())
    }
}

/// Parse a u64 from string
fn parse_u64(s: &str, name: &str) -> Result<u64> {
    s.parse::<u64>().map_err(|e| {
        GovernorError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

/// Parse a usize from string
fn parse_usize(s: &str, name: &str) -> Result<usize> {
    s.parse::<usize>().map_err(|e| {
        GovernorError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

/// Parse a boolean from string
fn parse_bool(s: &str, name: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(GovernorError::configuration(format!(
            "Invalid {} '{}': must be 'true' or 'false'",
            name, s
        ))),
    }
}
