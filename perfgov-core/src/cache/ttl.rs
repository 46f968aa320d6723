//! # TTL Cache Implementation
//!
//! 线程安全的 TTL 缓存实现。
//!
//! ## 特性
//!
//! - 条目在 `now - created_at <= ttl` 期间可见
//! - 单一过期索引 (最小堆) + 周期清扫，替代每条目一个定时器
//! - `get` 时惰性删除已过期条目 (覆盖清扫前的调度抖动)
//! - 正则模式失效
//! - `get_cached_or_compute`: 未命中时计算并写入 (非 single-flight)
//! - `get_or_compute_coalesced`: 同一键的并发未命中共享一次计算
//! - 命中/未命中计数上报到 [`MetricsCollector`]
//!
//! ## 示例
//!
//! ```rust
//! use perfgov_core::cache::{CacheConfig, TtlCache};
//! use std::time::Duration;
//!
//! let cache: TtlCache<String> = TtlCache::new(CacheConfig::default());
//! cache.set("analytics:overview", "cached".to_string(), Some(Duration::from_secs(60)));
//! assert_eq!(cache.get("analytics:overview"), Some("cached".to_string()));
//! assert_eq!(cache.invalidate_pattern("analytics.*").unwrap(), 1);
//! assert_eq!(cache.get("analytics:overview"), None);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::expiry::ExpiryIndex;
use super::keys::DataKind;
use crate::clock::deadline_after;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::resources::Reclaimable;

/// 缓存条目
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    /// 缓存的值
    value: V,
    /// 创建时间
    created_at: Instant,
    /// TTL (Time To Live)
    ttl: Duration,
    /// 写入代数，用于识别过期索引中被覆盖的旧项
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn deadline(&self) -> Instant {
        deadline_after(self.created_at, self.ttl)
    }

    /// 检查是否过期
    fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// 缓存内部状态
#[derive(Debug)]
struct CacheState<V> {
    /// 主存储
    entries: HashMap<String, CacheEntry<V>>,
    /// 过期索引
    expiry: ExpiryIndex,
    next_generation: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            expiry: ExpiryIndex::new(),
            next_generation: 0,
        }
    }

    fn insert(&mut self, key: String, value: V, ttl: Duration) {
        self.next_generation += 1;
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl,
            generation: self.next_generation,
        };
        self.expiry
            .schedule(key.clone(), entry.generation, entry.deadline());
        self.entries.insert(key, entry);

        // 覆盖写入过多时压缩索引
        if self.expiry.len() > self.entries.len() * 2 + 64 {
            self.compact_index();
        }
    }

    fn compact_index(&mut self) {
        let live: Vec<_> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.generation, e.deadline()))
            .collect();
        self.expiry.rebuild(live);
    }

    /// 清扫到期索引项，返回删除的条目数
    fn sweep(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        for (key, generation) in self.expiry.pop_due(now) {
            let live = self
                .entries
                .get(&key)
                .map_or(false, |e| e.generation == generation && e.is_expired_at(now));
            if live {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }
}

type PendingCompute<V> = Shared<BoxFuture<'static, Result<V>>>;

/// 一次进行中的合并计算
struct PendingSlot<V> {
    id: u64,
    future: PendingCompute<V>,
    /// 仍在等待结果的调用者数
    waiters: usize,
}

type PendingMap<V> = Mutex<HashMap<String, PendingSlot<V>>>;

/// 等待者离开 (被取消) 时减少计数；最后一个离开时丢弃未完成的计算
struct PendingWaiter<'a, V> {
    pending: &'a PendingMap<V>,
    key: &'a str,
    id: u64,
}

impl<V> Drop for PendingWaiter<'_, V> {
    fn drop(&mut self) {
        let abandoned = {
            let mut pending = self.pending.lock();
            match pending.get_mut(self.key) {
                Some(slot) if slot.id == self.id => {
                    slot.waiters -= 1;
                    if slot.waiters == 0 {
                        pending.remove(self.key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        // 计算本身可能持有其他等待者，在锁外丢弃
        if abandoned.is_some() {
            debug!("Dropped abandoned computation for '{}'", self.key);
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// 当前条目数 (含尚未清扫的过期条目)
    pub size: usize,
    /// 所有键 (排序)
    pub keys: Vec<String>,
    /// 以 JSON 序列化长度估算的内存占用
    pub estimated_bytes: usize,
}

/// TTL 缓存
pub struct TtlCache<V> {
    /// 缓存配置
    config: CacheConfig,
    /// 缓存存储
    state: Mutex<CacheState<V>>,
    /// 进行中的合并计算
    pending: PendingMap<V>,
    next_pending_id: Mutex<u64>,
    /// 指标收集器
    metrics: Option<Arc<MetricsCollector>>,
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("config", &self.config)
            .field("entries", &self.state.lock().entries.len())
            .finish_non_exhaustive()
    }
}

impl<V: Clone> TtlCache<V> {
    /// 创建新的 TTL 缓存
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::new()),
            pending: Mutex::new(HashMap::new()),
            next_pending_id: Mutex::new(0),
            metrics: None,
        }
    }

    /// 创建上报指标的 TTL 缓存
    pub fn with_metrics(config: CacheConfig, metrics: Arc<MetricsCollector>) -> Self {
        let mut cache = Self::new(config);
        cache.metrics = Some(metrics);
        cache
    }

    /// 获取配置
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn count(&self, name: &str) {
        if !self.config.enable_metrics {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.increment_counter(name, 1);
        }
    }

    /// 写入缓存
    ///
    /// # 参数
    /// - `key`: 缓存键
    /// - `value`: 缓存值
    /// - `ttl`: 可选的 TTL，默认使用配置的 default_ttl
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }

        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        self.state.lock().insert(key.into(), value, ttl);
        self.count("cache_sets");
    }

    /// 获取缓存值
    ///
    /// 未命中或已过期返回 `None`；已过期的条目在此处直接删除。
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        let mut state = self.state.lock();

        let (hit, expired) = match state.entries.get(key) {
            Some(entry) if !entry.is_expired_at(now) => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            state.entries.remove(key);
        }
        drop(state);

        if hit.is_some() {
            self.count("cache_hits");
        } else {
            if expired {
                self.count("cache_expirations");
            }
            self.count("cache_misses");
        }
        hit
    }

    /// 不计入命中统计的读取
    fn peek(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.value.clone())
    }

    /// 删除指定条目，返回是否存在
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// 删除所有匹配正则 `pattern` 的键，返回删除数
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;

        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !regex.is_match(key));
        let removed = before - state.entries.len();
        drop(state);

        if removed > 0 {
            debug!("Invalidated {} cache entries matching '{}'", removed, pattern);
            if self.config.enable_metrics {
                if let Some(metrics) = &self.metrics {
                    metrics.increment_counter("cache_invalidations", removed as u64);
                }
            }
        }
        Ok(removed)
    }

    /// 数据变更后使相关分析缓存失效
    pub fn invalidate_data(&self, kind: DataKind) -> usize {
        match self.invalidate_pattern(kind.pattern()) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to invalidate {:?} cache entries: {}", kind, e);
                0
            }
        }
    }

    /// 清空缓存
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.expiry.clear();
    }

    /// 获取缓存大小
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// 检查缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// 检查是否包含指定键 (不判断是否过期)
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// 清扫过期索引，移除已过期的条目
    ///
    /// 通常由后台任务定期调用。
    pub fn purge_expired(&self) -> usize {
        let removed = self.state.lock().sweep(Instant::now());
        if removed > 0 {
            debug!("Removed {} expired cache entries", removed);
            if self.config.enable_metrics {
                if let Some(metrics) = &self.metrics {
                    metrics.increment_counter("cache_expirations", removed as u64);
                }
            }
        }
        removed
    }

    /// 命中返回缓存值；未命中调用 `compute`，写入结果并返回
    ///
    /// 不是 single-flight：`compute` 挂起期间，相同键的其他调用者
    /// 会各自再执行一次计算。需要合并时使用
    /// [`get_or_compute_coalesced`](Self::get_or_compute_coalesced)。
    /// 计算失败不会写入缓存。
    pub async fn get_cached_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// 与 [`get_cached_or_compute`](Self::get_cached_or_compute) 相同，
    /// 但同一键的并发未命中共享一次进行中的计算。
    ///
    /// 计算失败时所有等待者得到同一个错误，且不写入缓存；
    /// 无论成功与否，进行中的记录都会被清除。所有等待者都被取消时
    /// 计算随之丢弃，下一次未命中重新开始。
    pub async fn get_or_compute_coalesced<F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let (id, shared) = {
            let mut pending = self.pending.lock();
            if let Some(slot) = pending.get_mut(key) {
                debug!("Joining in-flight computation for '{}'", key);
                slot.waiters += 1;
                (slot.id, slot.future.clone())
            } else {
                // 上一次计算可能刚刚完成并写入
                if let Some(value) = self.peek(key) {
                    return Ok(value);
                }
                let id = {
                    let mut next = self.next_pending_id.lock();
                    *next += 1;
                    *next
                };
                let shared = compute().boxed().shared();
                pending.insert(
                    key.to_string(),
                    PendingSlot {
                        id,
                        future: shared.clone(),
                        waiters: 1,
                    },
                );
                (id, shared)
            }
        };

        let waiter = PendingWaiter {
            pending: &self.pending,
            key,
            id,
        };
        let result = shared.await;

        // 第一个完成的等待者负责写入缓存并清除记录
        {
            let mut pending = self.pending.lock();
            if pending.get(key).map_or(false, |slot| slot.id == id) {
                if let Ok(value) = &result {
                    self.set(key, value.clone(), ttl);
                }
                pending.remove(key);
            }
        }
        drop(waiter);

        result
    }

    /// 当前进行中的合并计算数
    pub fn pending_computations(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<V: Clone + Serialize> TtlCache<V> {
    /// 获取缓存统计
    ///
    /// 内存占用按 JSON 序列化长度估算；序列化失败的条目按 0 计。
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.sort();

        let estimated_bytes = state
            .entries
            .iter()
            .map(|(key, entry)| match serde_json::to_vec(&entry.value) {
                Ok(bytes) => key.len() + bytes.len(),
                Err(e) => {
                    warn!("Cache entry '{}' could not be sized: {}", key, e);
                    0
                }
            })
            .sum();

        CacheStats {
            size: state.entries.len(),
            keys,
            estimated_bytes,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Reclaimable for TtlCache<V> {
    fn name(&self) -> &str {
        "ttl_cache"
    }

    fn reclaim(&self) -> usize {
        let removed = self.purge_expired();
        let mut state = self.state.lock();
        state.compact_index();
        state.entries.shrink_to_fit();
        state.expiry.shrink_to_fit();
        removed
    }
}
