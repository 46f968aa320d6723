//! # Resource Governor
//!
//! 对象池、保留缓存与内存压力触发的清理。
//!
//! ## 清理策略
//!
//! - `perform_cleanup`: 池缩减到残留大小，保留缓存按 LRU 缩减，
//!   并请求已注册组件回收 (替代宿主运行时的完整回收)
//! - `auto_cleanup`: 距上次清理超过间隔 **且** 内存超过阈值的 80% 时才清理，
//!   避免频繁抖动
//! - `process_batches`: 每批之间检查内存，超过阈值立即清理

use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::memo::Memoizer;
use super::memory::{MemoryProbe, ProcessMemoryProbe};
use super::pool::{ObjectPools, Poolable};
use super::retention::RetentionCache;
use super::{MemorySample, ResourceConfig};
use crate::error::Result;
use crate::metrics::MetricsCollector;

/// 可在清理时回收内存的组件
pub trait Reclaimable: Send + Sync {
    fn name(&self) -> &str;

    /// 回收可回收的内存，返回释放的条目数
    fn reclaim(&self) -> usize;
}

/// 一次清理的结果
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    /// 从对象池与保留缓存中释放的对象数
    pub freed_objects: usize,
    /// 已注册组件回收的条目数
    pub reclaimed_entries: usize,
    pub duration: Duration,
    pub memory_after: MemorySample,
}

/// 内存使用与峰值
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryUsage {
    pub sample: MemorySample,
    pub peak_bytes: u64,
}

/// 内存报告
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub sample: MemorySample,
    pub peak_bytes: u64,
    pub freed_objects_total: u64,
    pub pool_sizes: BTreeMap<String, usize>,
    pub retained_entries: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct GovernorStats {
    peak_bytes: u64,
    freed_total: u64,
    last_cleanup_at: Instant,
    last_cleanup: Option<DateTime<Utc>>,
}

impl GovernorStats {
    fn new() -> Self {
        Self {
            peak_bytes: 0,
            freed_total: 0,
            last_cleanup_at: Instant::now(),
            last_cleanup: None,
        }
    }
}

/// 资源管理器
pub struct ResourceGovernor {
    config: ResourceConfig,
    pools: ObjectPools,
    retained: RetentionCache<Arc<Value>>,
    probe: Arc<dyn MemoryProbe>,
    reclaimers: RwLock<Vec<Arc<dyn Reclaimable>>>,
    stats: Mutex<GovernorStats>,
    metrics: Arc<MetricsCollector>,
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGovernor")
            .field("config", &self.config)
            .field("pools", &self.pools)
            .field("retained", &self.retained.len())
            .finish_non_exhaustive()
    }
}

impl ResourceGovernor {
    /// 使用进程内存探针创建
    pub fn new(config: ResourceConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self::with_probe(config, metrics, Arc::new(ProcessMemoryProbe::new()))
    }

    pub fn with_probe(
        config: ResourceConfig,
        metrics: Arc<MetricsCollector>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            pools: ObjectPools::new(config.pool_capacity),
            retained: RetentionCache::new(config.retention_capacity),
            config,
            probe,
            reclaimers: RwLock::new(Vec::new()),
            stats: Mutex::new(GovernorStats::new()),
            metrics,
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// 注册清理时需要回收的组件
    pub fn register(&self, component: Arc<dyn Reclaimable>) {
        debug!("Registered reclaimable component '{}'", component.name());
        self.reclaimers.write().push(component);
    }

    /// 从对象池获取对象
    pub fn get_from_pool<T, F>(&self, kind: &str, create: F) -> T
    where
        T: Poolable,
        F: FnOnce() -> T,
    {
        self.pools.get(kind, create)
    }

    /// 归还对象到对象池
    pub fn return_to_pool<T: Poolable>(&self, kind: &str, obj: T) -> bool {
        self.pools.put(kind, obj)
    }

    /// 保留一个大对象；容量满时淘汰最久未使用的条目
    pub fn retain(&self, key: impl Into<String>, value: Arc<Value>) {
        if let Some((evicted, _)) = self.retained.insert(key, value) {
            debug!("Retention cache evicted '{}'", evicted);
        }
    }

    /// 获取保留的对象；未命中与从未保留无法区分
    pub fn retained(&self, key: &str) -> Option<Arc<Value>> {
        self.retained.get(key)
    }

    /// 创建一个有界记忆化缓存，并注册为清理时回收的组件
    pub fn memoizer<K, V>(&self, name: &str, capacity: usize) -> Arc<Memoizer<K, V>>
    where
        K: Hash + Eq + Send + 'static,
        V: Clone + Send + 'static,
    {
        let memo = Arc::new(Memoizer::new(name, capacity));
        self.register(memo.clone());
        memo
    }

    /// 读取当前内存使用并更新峰值
    pub fn get_memory_usage(&self) -> MemoryUsage {
        let sample = self.probe.sample();
        let mut stats = self.stats.lock();
        stats.peak_bytes = stats.peak_bytes.max(sample.rss_bytes);
        MemoryUsage {
            sample,
            peak_bytes: stats.peak_bytes,
        }
    }

    /// 执行清理
    pub fn perform_cleanup(&self) -> CleanupReport {
        let started = Instant::now();

        let mut freed_objects = self.pools.shrink_to(self.config.pool_residual);
        freed_objects += self.retained.trim_to(self.config.retention_residual);

        let reclaimed_entries: usize = self
            .reclaimers
            .read()
            .iter()
            .map(|component| component.reclaim())
            .sum();

        let duration = started.elapsed();
        {
            let mut stats = self.stats.lock();
            stats.freed_total += freed_objects as u64;
            stats.last_cleanup_at = Instant::now();
            stats.last_cleanup = Some(Utc::now());
        }

        self.metrics
            .record_metric("cleanup_duration", duration.as_secs_f64() * 1000.0);
        self.metrics
            .record_metric("objects_freed", freed_objects as f64);

        let memory_after = self.get_memory_usage().sample;
        info!(
            "Cleanup freed {} objects, reclaimed {} entries in {:?}",
            freed_objects, reclaimed_entries, duration
        );

        CleanupReport {
            freed_objects,
            reclaimed_entries,
            duration,
            memory_after,
        }
    }

    /// 定期调用：满足间隔与内存压力两个条件时执行清理
    pub fn auto_cleanup(&self) -> Option<CleanupReport> {
        let since_last = self.stats.lock().last_cleanup_at.elapsed();
        if since_last <= self.config.cleanup_interval() {
            return None;
        }

        let usage = self.get_memory_usage();
        let trigger =
            self.config.memory_threshold_bytes() as f64 * self.config.cleanup_trigger_ratio;
        if (usage.sample.rss_bytes as f64) <= trigger {
            debug!(
                "Memory usage {} bytes below cleanup trigger {:.0}",
                usage.sample.rss_bytes, trigger
            );
            return None;
        }

        Some(self.perform_cleanup())
    }

    /// 按 `batch_size` 分批调用 `processor`，按顺序拼接结果
    ///
    /// 每批完成后检查内存，超过阈值时立即执行清理 (不受清理间隔限制)。
    /// 任一批失败即返回该错误。
    pub async fn process_batches<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        batch_size: usize,
        mut processor: F,
    ) -> Result<Vec<R>>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<R>>>,
    {
        let batch_size = batch_size.max(1);
        let total = (items.len() + batch_size - 1) / batch_size;
        let mut results = Vec::with_capacity(items.len());
        let mut items = items.into_iter();

        for index in 0..total {
            let batch: Vec<T> = items.by_ref().take(batch_size).collect();
            results.extend(processor(batch).await?);

            let usage = self.get_memory_usage();
            if usage.sample.rss_bytes > self.config.memory_threshold_bytes() {
                warn!(
                    "Memory threshold reached after batch {}/{}, forcing cleanup",
                    index + 1,
                    total
                );
                self.perform_cleanup();
            }
        }

        Ok(results)
    }

    /// 清空所有池和保留缓存，回收所有组件并重置统计
    pub fn full_cleanup(&self) -> usize {
        let mut freed = self.pools.clear();
        freed += self.retained.len();
        self.retained.clear();

        for component in self.reclaimers.read().iter() {
            component.reclaim();
        }

        *self.stats.lock() = GovernorStats::new();
        info!("Full cleanup released {} objects", freed);
        freed
    }

    /// 内存报告
    pub fn memory_report(&self) -> MemoryReport {
        let usage = self.get_memory_usage();
        let stats = self.stats.lock();
        MemoryReport {
            sample: usage.sample,
            peak_bytes: usage.peak_bytes,
            freed_objects_total: stats.freed_total,
            pool_sizes: self.pools.sizes(),
            retained_entries: self.retained.len(),
            last_cleanup: stats.last_cleanup,
        }
    }
}
