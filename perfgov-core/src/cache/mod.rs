//! # Cache Module
//!
//! 分析接口的 TTL 缓存层。
//!
//! ## 模块结构
//!
//! - `config`: 缓存配置
//! - `ttl`: TTL 缓存核心实现
//! - `expiry`: 过期索引 (最小堆)
//! - `keys`: 缓存键与失效模式
//!
//! ## 特性
//!
//! - 每条目 TTL，周期清扫 + 读取时惰性删除
//! - 正则模式失效
//! - get-or-compute 辅助 (默认不合并并发未命中，可选合并)
//! - 命中率统计上报
//!
//! ## 示例
//!
//! ```rust
//! use perfgov_core::cache::{CacheConfig, DataKind, TtlCache};
//! use serde_json::json;
//!
//! # async fn example() -> perfgov_core::Result<()> {
//! let cache: TtlCache<serde_json::Value> = TtlCache::new(CacheConfig::default());
//!
//! let overview = cache
//!     .get_cached_or_compute(
//!         "analytics:GET:/api/attendance/overview",
//!         || async { Ok(json!({"present": 0.93})) },
//!         None,
//!     )
//!     .await?;
//! assert_eq!(overview["present"], 0.93);
//!
//! // 考勤数据变更后失效相关缓存
//! cache.invalidate_data(DataKind::Attendance);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod expiry;
pub mod keys;
pub mod ttl;

pub use config::CacheConfig;
pub use keys::{request_cache_key, DataKind};
pub use ttl::{CacheStats, TtlCache};
