//! # Performance Governor
//!
//! 服务对象：把缓存、指标、准入控制、工作线程调度和资源管理组装在一起，
//! 并运行后台维护任务。每个实例独立，没有全局单例。
//!
//! ## 后台任务
//!
//! | 任务 | 间隔 | 作用 |
//! |------|------|------|
//! | sweeper | `cache.sweep_interval_ms` | 清扫过期缓存、空闲限流窗口、过期节流槽位 |
//! | auto-cleanup | `resources.cleanup_interval_secs` | 内存压力下的资源清理 |
//! | monitor | `dispatcher.monitor_interval_secs` | 队列长度与利用率告警 |
//! | collector | `metrics.collection_interval_secs` | 记录内存样本，清理过旧指标 |
//! | cache-optimizer | `cache.optimize_interval_secs` | 缓存超限时清扫，预热 `cache.popular_keys` |
//!
//! 每次 [`record_request`](PerformanceGovernor::record_request) 之后还会调用
//! `auto_cleanup`，其自身的间隔与内存条件决定是否真正清理。
//!
//! ## 示例
//!
//! ```rust,no_run
//! use perfgov_core::{GovernorConfig, PerformanceGovernor};
//! use serde_json::json;
//!
//! # async fn example() -> perfgov_core::Result<()> {
//! let governor = PerformanceGovernor::new(GovernorConfig::default())?;
//! governor.start();
//!
//! let stats = governor.optimized_compute_stats(vec![json!({"id": 1})]).await?;
//! println!("{}", stats);
//!
//! governor.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::admission::AdmissionControl;
use crate::cache::{CacheConfig, TtlCache};
use crate::config::GovernorConfig;
use crate::dispatcher::worker::mark_processed;
use crate::dispatcher::{AnalyticsTaskHandler, DispatcherStats, HandlerFactory, WorkerDispatcher};
use crate::error::{GovernorError, Result};
use crate::metrics::MetricsCollector;
use crate::resources::{MemoryProbe, ProcessMemoryProbe, ResourceGovernor};

/// TTL of entries written by [`PerformanceGovernor::preload`]
const PRELOAD_TTL: Duration = Duration::from_secs(10 * 60);

/// 缓存预热使用的加载函数：键 -> 数据
pub type Preloader = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// 一轮缓存优化的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheOptimization {
    /// 超限清扫删除的过期条目数
    pub purged: usize,
    /// 本轮新加载 (非命中) 的热点键数
    pub preloaded: usize,
}

/// 一个预加载键的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreloadEntry {
    pub key: String,
    pub data: Value,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub rss_mb: u64,
    pub virtual_mb: u64,
    pub peak_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiSummary {
    pub total_requests: u64,
    /// 平均响应时间 (ms)
    pub average_response_time: f64,
    /// 4xx + 5xx 占比 (%)
    pub error_rate: f64,
    /// 响应时间直方图 (ms 桶)
    pub response_time_histogram: BTreeMap<i64, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    /// 命中率 (%)
    pub hit_rate: f64,
    pub entries: usize,
}

/// 性能报告
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub timestamp: DateTime<Utc>,
    pub memory: MemorySummary,
    pub api: ApiSummary,
    pub cache: CacheSummary,
    /// `stats_computation_time` 的平均值 (ms)
    pub computation_time: f64,
    pub workers: DispatcherStats,
}

/// 性能治理服务
pub struct PerformanceGovernor {
    config: GovernorConfig,
    metrics: Arc<MetricsCollector>,
    cache: Arc<TtlCache<Value>>,
    admission: Arc<AdmissionControl>,
    dispatcher: Arc<WorkerDispatcher>,
    resources: Arc<ResourceGovernor>,
    /// 后台任务句柄
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// 关闭信号发送端
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    /// 热点键加载函数，供缓存优化任务使用
    preloader: Arc<Mutex<Option<Preloader>>>,
}

impl std::fmt::Debug for PerformanceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceGovernor")
            .field("cache", &self.cache)
            .field("dispatcher", &self.dispatcher)
            .field("resources", &self.resources)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PerformanceGovernor {
    /// 创建治理服务 (内置分析任务处理器，进程内存探针)
    ///
    /// 必须在 tokio runtime 中调用。
    pub fn new(config: GovernorConfig) -> Result<Self> {
        Self::with_parts(
            config,
            AnalyticsTaskHandler::factory(),
            Arc::new(ProcessMemoryProbe::new()),
        )
    }

    /// 使用自定义的工作线程任务处理器
    pub fn with_handler_factory(config: GovernorConfig, factory: HandlerFactory) -> Result<Self> {
        Self::with_parts(config, factory, Arc::new(ProcessMemoryProbe::new()))
    }

    /// 使用自定义的内存探针
    pub fn with_memory_probe(config: GovernorConfig, probe: Arc<dyn MemoryProbe>) -> Result<Self> {
        Self::with_parts(config, AnalyticsTaskHandler::factory(), probe)
    }

    pub fn with_parts(
        config: GovernorConfig,
        factory: HandlerFactory,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let cache = Arc::new(TtlCache::with_metrics(config.cache.clone(), metrics.clone()));
        let admission = Arc::new(AdmissionControl::new(
            config.admission.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(WorkerDispatcher::new(config.dispatcher.clone(), factory));
        let resources = Arc::new(ResourceGovernor::with_probe(
            config.resources.clone(),
            metrics.clone(),
            probe,
        ));
        resources.register(cache.clone());

        Ok(Self {
            config,
            metrics,
            cache,
            admission,
            dispatcher,
            resources,
            tasks: Mutex::new(Vec::new()),
            shutdown_tx: Mutex::new(None),
            preloader: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    pub fn dispatcher(&self) -> &Arc<WorkerDispatcher> {
        &self.dispatcher
    }

    pub fn resources(&self) -> &Arc<ResourceGovernor> {
        &self.resources
    }

    /// 设置缓存优化任务预热热点键时使用的加载函数
    pub fn set_preloader<F, Fut>(&self, loader: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let loader: Preloader = Arc::new(move |key| loader(key).boxed());
        *self.preloader.lock() = Some(loader);
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.lock().is_some()
    }

    /// 启动后台任务；重复调用无效果
    pub fn start(&self) {
        let mut shutdown_tx = self.shutdown_tx.lock();
        if shutdown_tx.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *shutdown_tx = Some(tx);

        let cache = self.cache.clone();
        let admission = self.admission.clone();
        let sweeper = spawn_loop(
            "sweeper",
            self.config.cache.sweep_interval(),
            rx.clone(),
            move || {
                cache.purge_expired();
                admission.sweep();
            },
        );

        let resources = self.resources.clone();
        let cleanup = spawn_loop(
            "auto-cleanup",
            self.config.resources.cleanup_interval(),
            rx.clone(),
            move || {
                resources.auto_cleanup();
            },
        );

        let dispatcher = self.dispatcher.clone();
        let monitor = spawn_loop(
            "monitor",
            self.config.dispatcher.monitor_interval(),
            rx.clone(),
            move || {
                dispatcher.monitor();
            },
        );

        let metrics = self.metrics.clone();
        let resources = self.resources.clone();
        let retention = self.config.metrics.retention();
        let collector = spawn_loop(
            "collector",
            self.config.metrics.collection_interval(),
            rx.clone(),
            move || {
                let usage = resources.get_memory_usage();
                metrics.record_memory_usage(&usage.sample);
                metrics.cleanup(retention);
            },
        );

        let cache = self.cache.clone();
        let cache_config = self.config.cache.clone();
        let preloader = self.preloader.clone();
        let optimizer = spawn_async_loop(
            "cache-optimizer",
            self.config.cache.optimize_interval(),
            rx,
            move || {
                let cache = cache.clone();
                let config = cache_config.clone();
                let loader = preloader.lock().clone();
                async move {
                    run_cache_optimization(&cache, &config, loader).await;
                }
            },
        );

        self.tasks
            .lock()
            .extend([sweeper, cleanup, monitor, collector, optimizer]);
        info!("Performance governor started");
    }

    /// 停止后台任务并关闭工作线程池
    pub async fn shutdown(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        self.dispatcher.shutdown().await;
        info!("Performance governor stopped");
    }

    /// 按数据量选择处理方式
    ///
    /// - 超过 `batch_threshold`: 分批交给工作线程 (批间检查内存压力)，
    ///   返回处理后的条目数组
    /// - 超过 `inline_threshold`: 单个 `computeStats` 任务，返回统计结果
    /// - 其余: 在当前任务内标记为已处理
    pub async fn optimized_compute_stats(&self, data: Vec<Value>) -> Result<Value> {
        let started = Instant::now();
        let dispatcher_config = &self.config.dispatcher;

        let result = if data.len() > dispatcher_config.batch_threshold {
            let batch_size = dispatcher_config.batch_size;
            let dispatcher: &WorkerDispatcher = &self.dispatcher;
            self.resources
                .process_batches(data, batch_size, move |batch| {
                    dispatcher.batch_process(batch, batch_size)
                })
                .await
                .map(Value::Array)
        } else if data.len() > dispatcher_config.inline_threshold {
            self.dispatcher
                .dispatch_task("computeStats", Value::Array(data))
                .await
        } else {
            Ok(Value::Array(data.into_iter().map(mark_processed).collect()))
        };

        self.metrics.record_metric(
            "stats_computation_time",
            started.elapsed().as_secs_f64() * 1000.0,
        );
        result
    }

    /// 并发执行命名聚合，任一失败即整体失败
    pub async fn aggregate<'a>(
        &self,
        aggregations: Vec<(&'a str, BoxFuture<'a, Result<Value>>)>,
    ) -> Result<Map<String, Value>> {
        let started = Instant::now();

        let named = aggregations
            .into_iter()
            .map(|(name, fut)| async move { fut.await.map(|value| (name.to_string(), value)) });

        match try_join_all(named).await {
            Ok(results) => {
                self.metrics.record_metric(
                    "aggregation_time",
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                Ok(results.into_iter().collect())
            }
            Err(e) => {
                self.metrics.increment_counter("aggregation_errors", 1);
                Err(e)
            }
        }
    }

    /// 缓存预热：已缓存的键直接返回，其余调用 `loader` 并写入缓存
    pub async fn preload<F, Fut>(&self, keys: &[String], loader: F) -> Result<Vec<PreloadEntry>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        preload_keys(&self.cache, keys, loader).await
    }

    /// 立即执行一轮缓存优化 (与后台 cache-optimizer 任务相同)
    pub async fn optimize_cache(&self) -> CacheOptimization {
        let loader = self.preloader.lock().clone();
        run_cache_optimization(&self.cache, &self.config.cache, loader).await
    }

    /// 记录一次 HTTP 请求，随后按条件触发资源清理
    pub fn record_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        let millis = duration.as_secs_f64() * 1000.0;

        self.metrics.increment_counter("api_requests_total", 1);
        self.metrics
            .increment_counter(&format!("api_responses_{}", status), 1);
        if status >= 400 {
            self.metrics
                .increment_counter(&format!("api_responses_{}xx", status / 100), 1);
        }
        self.metrics.record_histogram("api_response_time", millis);
        self.metrics.record_metric("api_response_time", millis);

        if duration > self.config.metrics.slow_threshold() {
            warn!("Slow request: {} {} took {:.0}ms", method, route, millis);
        }

        self.resources.auto_cleanup();
    }

    /// 汇总性能报告
    pub fn performance_report(&self) -> PerformanceReport {
        const MIB: u64 = 1024 * 1024;

        let usage = self.resources.get_memory_usage();
        let snapshot = self.metrics.snapshot();
        let counter = |name: &str| snapshot.counters.get(name).copied().unwrap_or(0);
        let avg = |name: &str| snapshot.metrics.get(name).map_or(0.0, |s| s.avg);

        let total_requests = counter("api_requests_total");
        let errors = counter("api_responses_4xx") + counter("api_responses_5xx");
        let error_rate = if total_requests > 0 {
            errors as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };

        let hits = counter("cache_hits");
        let lookups = hits + counter("cache_misses");
        let hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };

        PerformanceReport {
            timestamp: Utc::now(),
            memory: MemorySummary {
                rss_mb: usage.sample.rss_bytes / MIB,
                virtual_mb: usage.sample.virtual_bytes / MIB,
                peak_mb: usage.peak_bytes / MIB,
            },
            api: ApiSummary {
                total_requests,
                average_response_time: avg("api_response_time"),
                error_rate,
                response_time_histogram: snapshot
                    .histograms
                    .get("api_response_time")
                    .cloned()
                    .unwrap_or_default(),
            },
            cache: CacheSummary {
                hit_rate,
                entries: self.cache.len(),
            },
            computation_time: avg("stats_computation_time"),
            workers: self.dispatcher.stats(),
        }
    }
}

/// 已缓存的键直接返回，其余调用 `loader` 并以 [`PRELOAD_TTL`] 写入
async fn preload_keys<F, Fut>(
    cache: &TtlCache<Value>,
    keys: &[String],
    loader: F,
) -> Result<Vec<PreloadEntry>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let loads = keys.iter().map(|key| {
        let load = &loader;
        async move {
            if let Some(data) = cache.get(key) {
                return Ok(PreloadEntry {
                    key: key.clone(),
                    data,
                    from_cache: true,
                });
            }
            let data = load(key.clone()).await?;
            cache.set(key.as_str(), data.clone(), Some(PRELOAD_TTL));
            Ok::<_, GovernorError>(PreloadEntry {
                key: key.clone(),
                data,
                from_cache: false,
            })
        }
    });

    let entries = try_join_all(loads).await?;
    debug!("Preloaded {} cache keys", entries.len());
    Ok(entries)
}

/// 估算占用超过阈值时清扫过期条目；设置了加载函数时预热热点键
async fn run_cache_optimization(
    cache: &TtlCache<Value>,
    config: &CacheConfig,
    loader: Option<Preloader>,
) -> CacheOptimization {
    let mut outcome = CacheOptimization::default();

    let estimated = cache.stats().estimated_bytes as u64;
    if estimated > config.optimize_threshold_bytes {
        outcome.purged = cache.purge_expired();
        info!(
            "Cache auto-cleanup removed {} entries (estimated {} bytes)",
            outcome.purged, estimated
        );
    }

    if let Some(loader) = loader {
        match preload_keys(cache, &config.popular_keys, |key| loader(key)).await {
            Ok(entries) => outcome.preloaded = entries.iter().filter(|e| !e.from_cache).count(),
            Err(e) => warn!("Preloading popular keys failed: {}", e),
        }
    }

    outcome
}

/// 按固定间隔运行 `tick`，直到收到关闭信号
fn spawn_loop<F>(
    name: &'static str,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    spawn_async_loop(name, period, shutdown_rx, move || {
        tick();
        futures::future::ready(())
    })
}

/// [`spawn_loop`] 的异步版本：每次 tick 等待 `tick()` 返回的 future 完成
fn spawn_async_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        debug!("{} task started (interval: {:?})", name, period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = shutdown_rx.changed() => {
                    debug!("{} task shutting down", name);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::FixedMemoryProbe;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MIB: u64 = 1024 * 1024;

    fn governor() -> PerformanceGovernor {
        let mut config = GovernorConfig::default();
        config.dispatcher.workers = 2;
        PerformanceGovernor::with_memory_probe(config, Arc::new(FixedMemoryProbe::new(64 * MIB)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = GovernorConfig::default();
        config.metrics.max_samples = 0;
        let err = PerformanceGovernor::new(config).unwrap_err();
        assert!(matches!(err, GovernorError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_small_data_inline() {
        let governor = governor();
        let result = governor
            .optimized_compute_stats(vec![json!({"id": 1}), json!({"id": 2})])
            .await
            .unwrap();
        assert_eq!(result, json!([{"id": 1, "processed": true}, {"id": 2, "processed": true}]));
        assert!(governor.metrics().get_metric_stats("stats_computation_time").is_some());
        governor.shutdown().await;
    }

    #[tokio::test]
    async fn test_medium_data_uses_worker() {
        let governor = governor();
        let data: Vec<Value> = (0..150).map(|i| json!({ "id": i })).collect();
        let result = governor.optimized_compute_stats(data).await.unwrap();
        assert_eq!(result["processed"], 150);
        governor.shutdown().await;
    }

    #[tokio::test]
    async fn test_large_data_batched() {
        let governor = governor();
        let data: Vec<Value> = (0..1001).map(|i| json!({ "id": i })).collect();
        let result = governor.optimized_compute_stats(data).await.unwrap();
        let items = result.as_array().unwrap();
        assert_eq!(items.len(), 1001);
        assert_eq!(items[1000], json!({"id": 1000, "processed": true}));
        governor.shutdown().await;
    }

    #[tokio::test]
    async fn test_aggregate() {
        let governor = governor();
        let grades = vec![80.0, 90.0, 100.0];

        let results = governor
            .aggregate(vec![
                ("count", async { Ok::<_, GovernorError>(json!(grades.len())) }.boxed()),
                (
                    "average",
                    async {
                        let average = grades.iter().sum::<f64>() / grades.len() as f64;
                        Ok::<_, GovernorError>(json!(average))
                    }
                    .boxed(),
                ),
            ])
            .await
            .unwrap();

        assert_eq!(results["count"], 3);
        assert_eq!(results["average"], 90.0);
        assert!(governor.metrics().get_metric_stats("aggregation_time").is_some());

        let err = governor
            .aggregate(vec![(
                "broken",
                async { Err::<Value, _>(GovernorError::compute("missing grades")) }.boxed(),
            )])
            .await
            .unwrap_err();
        assert!(matches!(err, GovernorError::Compute(_)));
        assert_eq!(governor.metrics().counter("aggregation_errors"), 1);
        governor.shutdown().await;
    }

    #[tokio::test]
    async fn test_preload() {
        let governor = governor();
        governor.cache().set("analytics:overview", json!("cached"), None);

        let keys = vec!["analytics:overview".to_string(), "analytics:alerts".to_string()];
        let entries = governor
            .preload(&keys, |key| async move { Ok(json!({ "loaded": key })) })
            .await
            .unwrap();

        assert!(entries[0].from_cache);
        assert_eq!(entries[0].data, json!("cached"));
        assert!(!entries[1].from_cache);
        assert_eq!(
            governor.cache().get("analytics:alerts"),
            Some(json!({"loaded": "analytics:alerts"}))
        );
        governor.shutdown().await;
    }

    #[tokio::test]
    async fn test_performance_report() {
        let governor = governor();
        governor.record_request("GET", "/api/students", 200, Duration::from_millis(12));
        governor.record_request("GET", "/api/students", 404, Duration::from_millis(3));
        governor.record_request("POST", "/api/grades", 500, Duration::from_millis(25));
        governor.record_request("GET", "/api/analytics", 200, Duration::from_millis(20));

        governor.cache().set("k", json!(1), None);
        governor.cache().get("k");
        governor.cache().get("missing");

        let report = governor.performance_report();
        assert_eq!(report.api.total_requests, 4);
        assert_eq!(report.api.error_rate, 50.0);
        assert_eq!(report.api.average_response_time, 15.0);
        assert_eq!(report.api.response_time_histogram.get(&20), Some(&2));
        assert_eq!(report.cache.hit_rate, 50.0);
        assert_eq!(report.memory.rss_mb, 64);
        assert_eq!(report.workers.available, 2);
        governor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimize_cache_purges_only_above_threshold() {
        let mut config = GovernorConfig::default();
        config.dispatcher.workers = 1;
        config.cache.optimize_threshold_bytes = 1024;
        let governor = PerformanceGovernor::new(config).unwrap();

        governor
            .cache()
            .set("stale", json!("x".repeat(2048)), Some(Duration::from_millis(10)));
        governor.cache().set("fresh", json!(1), None);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = governor.optimize_cache().await;
        assert_eq!(outcome, CacheOptimization { purged: 1, preloaded: 0 });
        assert!(governor.cache().contains_key("fresh"));

        // now under the threshold: expired entries are left to the sweeper
        governor
            .cache()
            .set("stale", json!(2), Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(governor.optimize_cache().await.purged, 0);
        assert!(governor.cache().contains_key("stale"));
        governor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimizer_preloads_popular_keys() {
        let governor = governor();
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        governor.set_preloader(move |key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({ "preloaded": key })) }
        });

        governor.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            governor.cache().get("analytics:overview"),
            Some(json!({"preloaded": "analytics:overview"}))
        );
        assert!(governor.cache().contains_key("analytics:trends"));
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        // cached keys are not reloaded on the next round
        assert_eq!(governor.optimize_cache().await.preloaded, 0);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        governor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_triggers_auto_cleanup() {
        let mut config = GovernorConfig::default();
        config.dispatcher.workers = 1;
        let memory = Arc::new(FixedMemoryProbe::new(95 * MIB));
        let governor = PerformanceGovernor::with_memory_probe(config, memory).unwrap();

        governor.record_request("GET", "/api/students", 200, Duration::from_millis(5));
        assert!(governor.resources().memory_report().last_cleanup.is_none());

        tokio::time::sleep(Duration::from_secs(61)).await;
        governor.record_request("GET", "/api/students", 200, Duration::from_millis(5));
        assert!(governor.resources().memory_report().last_cleanup.is_some());
        governor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let governor = governor();
        governor
            .cache()
            .set("short", json!(1), Some(Duration::from_millis(100)));
        governor.start();
        assert!(governor.is_running());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!governor.cache().contains_key("short"));
        assert!(governor.metrics().get_metric_stats("memory_rss").is_some());

        governor.shutdown().await;
        assert!(!governor.is_running());
    }
}
