//! # Cache Configuration
//!
//! 缓存配置管理模块。
//!
//! ## 配置选项
//!
//! - `enabled`: 是否启用缓存
//! - `default_ttl_ms`: 默认 TTL (毫秒)
//! - `sweep_interval_ms`: 过期索引清扫间隔 (毫秒)
//! - `enable_metrics`: 是否向指标收集器上报命中/未命中
//! - `optimize_interval_secs` / `optimize_threshold_bytes` / `popular_keys`:
//!   后台缓存优化 (超限清扫 + 热点键预热)
//!
//! ## 示例
//!
//! ```rust
//! use perfgov_core::cache::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig::default()
//!     .with_default_ttl(Duration::from_secs(600))
//!     .with_metrics(false);
//! assert_eq!(config.default_ttl(), Duration::from_secs(600));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{validate_non_zero, validation_error, ValidateConfig};
use crate::error::Result;

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    ///
    /// 全局开关，关闭后 `get` 总是未命中，`set` 不写入。
    pub enabled: bool,

    /// 默认 TTL (毫秒)
    ///
    /// `set` 未指定 TTL 时使用。
    pub default_ttl_ms: u64,

    /// 过期清扫间隔 (毫秒)
    ///
    /// 后台任务按此间隔清扫过期索引，替代每条目一个定时器。
    pub sweep_interval_ms: u64,

    /// 是否启用统计信息上报
    pub enable_metrics: bool,

    /// 缓存优化间隔 (秒)
    pub optimize_interval_secs: u64,

    /// 估算占用超过此值 (字节) 时优化任务清扫过期条目
    pub optimize_threshold_bytes: u64,

    /// 优化任务每轮预热的热点键
    pub popular_keys: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: 5 * 60 * 1000, // 5 分钟
            sweep_interval_ms: 1000,
            enable_metrics: true,
            optimize_interval_secs: 5 * 60,
            optimize_threshold_bytes: 50 * 1024 * 1024, // 50MB
            popular_keys: vec![
                "analytics:overview".to_string(),
                "analytics:trends".to_string(),
            ],
        }
    }
}

impl CacheConfig {
    /// 设置是否启用缓存
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 设置默认 TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// 设置清扫间隔
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// 设置是否启用统计信息上报
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn optimize_interval(&self) -> Duration {
        Duration::from_secs(self.optimize_interval_secs)
    }
}

impl ValidateConfig for CacheConfig {
    /// 验证配置是否有效
    fn validate(&self) -> Result<()> {
        validate_non_zero(self.default_ttl_ms, "cache.default_ttl_ms")?;
        validate_non_zero(self.sweep_interval_ms, "cache.sweep_interval_ms")?;
        validate_non_zero(self.optimize_interval_secs, "cache.optimize_interval_secs")?;
        validate_non_zero(self.optimize_threshold_bytes, "cache.optimize_threshold_bytes")?;

        if self.default_ttl_ms > 86_400_000 {
            return Err(validation_error(
                "cache.default_ttl_ms is too large (max: 86400000 = 1 day)",
            ));
        }

        Ok(())
    }
}
