//! # Metrics Collector
//!
//! Records timers, counters, histograms and bounded sample series.
//!
//! All state sits behind one `parking_lot::Mutex` that is only held for the
//! duration of a single bookkeeping step and never across an `.await`, so
//! every operation is atomic with respect to other callers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::export;
use super::MetricsConfig;
use crate::resources::MemorySample;

/// One recorded sample as exposed in stats
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Sample {
    value: f64,
    recorded_at: Instant,
    timestamp: DateTime<Utc>,
}

/// Summary statistics of one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    /// Most recent raw samples, oldest first
    pub recent: Vec<MetricSample>,
}

/// Point-in-time view of every metric
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, BTreeMap<i64, u64>>,
    pub metrics: BTreeMap<String, MetricStats>,
}

#[derive(Debug, Default)]
struct MetricsState {
    series: HashMap<String, VecDeque<Sample>>,
    counters: HashMap<String, u64>,
    histograms: HashMap<String, BTreeMap<i64, u64>>,
    timers: HashMap<String, Instant>,
}

/// Metrics collector
#[derive(Debug)]
pub struct MetricsCollector {
    config: MetricsConfig,
    state: Mutex<MetricsState>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MetricsState::default()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Start (or restart) the timer `name`
    pub fn start_timer(&self, name: &str) {
        self.state.lock().timers.insert(name.to_string(), Instant::now());
    }

    /// Stop the timer `name`, record the elapsed milliseconds as a sample
    /// under `name` and return them. `None` if the timer was never started.
    pub fn end_timer(&self, name: &str) -> Option<f64> {
        let mut state = self.state.lock();
        let started = state.timers.remove(name)?;
        let millis = started.elapsed().as_secs_f64() * 1000.0;
        self.push_sample(&mut state, name, millis);
        Some(millis)
    }

    /// Append a sample to the bounded series `name`
    pub fn record_metric(&self, name: &str, value: f64) {
        let mut state = self.state.lock();
        self.push_sample(&mut state, name, value);
    }

    fn push_sample(&self, state: &mut MetricsState, name: &str, value: f64) {
        let series = state.series.entry(name.to_string()).or_default();
        series.push_back(Sample {
            value,
            recorded_at: Instant::now(),
            timestamp: Utc::now(),
        });
        while series.len() > self.config.max_samples {
            series.pop_front();
        }
    }

    pub fn increment_counter(&self, name: &str, delta: u64) {
        let mut state = self.state.lock();
        let counter = state.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.saturating_add(delta);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Increment the width-10 bucket containing `value`
    pub fn record_histogram(&self, name: &str, value: f64) {
        let bucket = histogram_bucket(value);
        let mut state = self.state.lock();
        *state
            .histograms
            .entry(name.to_string())
            .or_default()
            .entry(bucket)
            .or_insert(0) += 1;
    }

    pub fn histogram(&self, name: &str) -> BTreeMap<i64, u64> {
        self.state
            .lock()
            .histograms
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Summary statistics over the retained samples of `name`
    pub fn get_metric_stats(&self, name: &str) -> Option<MetricStats> {
        let state = self.state.lock();
        let series = state.series.get(name)?;
        compute_stats(series, self.config.recent_samples)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            counters: state
                .counters
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            histograms: state
                .histograms
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            metrics: state
                .series
                .iter()
                .filter_map(|(k, series)| {
                    compute_stats(series, self.config.recent_samples).map(|s| (k.clone(), s))
                })
                .collect(),
        }
    }

    /// Scrape-friendly text export
    pub fn export_text(&self) -> String {
        export::render_text(&self.config.namespace, &self.snapshot())
    }

    /// JSON export of [`MetricsSnapshot`]; `"{}"` if serialization fails
    pub fn export_json(&self) -> String {
        export::to_json_or_empty(&self.snapshot())
    }

    /// Purge samples older than `max_age` from every series.
    /// Returns the number of purged samples.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };

        let mut state = self.state.lock();
        let mut purged = 0;
        for series in state.series.values_mut() {
            while series.front().map_or(false, |s| s.recorded_at < cutoff) {
                series.pop_front();
                purged += 1;
            }
        }
        state.series.retain(|_, series| !series.is_empty());

        if purged > 0 {
            debug!("Purged {} metric samples older than {:?}", purged, max_age);
        }
        purged
    }

    /// Time `fut`, count `{name}_success` / `{name}_error` and record the
    /// duration in milliseconds under `name`.
    pub async fn measure<F, T, E>(&self, name: &str, fut: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.increment_counter(&format!("{}_success", name), 1),
            Err(_) => self.increment_counter(&format!("{}_error", name), 1),
        }
        self.record_metric(name, elapsed.as_secs_f64() * 1000.0);

        if elapsed > self.config.slow_threshold() {
            warn!("Slow computation: {} took {:?}", name, elapsed);
        }
        result
    }

    /// Record one database query: `db_query_time` histogram (ms) and the
    /// `db_queries_total` counter. Queries over the slow-query threshold are
    /// logged with their text.
    pub fn track_db_query(&self, query: &str, duration: Duration) {
        let millis = duration.as_secs_f64() * 1000.0;
        self.record_histogram("db_query_time", millis);
        self.increment_counter("db_queries_total", 1);

        if duration > self.config.slow_query_threshold() {
            warn!("Slow database query ({:.0}ms): {}", millis, query);
        }
    }

    /// Record a process memory sample as `memory_rss` / `memory_virtual`
    pub fn record_memory_usage(&self, sample: &MemorySample) {
        self.record_metric("memory_rss", sample.rss_bytes as f64);
        self.record_metric("memory_virtual", sample.virtual_bytes as f64);
    }

    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

/// Bucket of a histogram value: rounded down to a multiple of 10
pub(crate) fn histogram_bucket(value: f64) -> i64 {
    ((value / 10.0).floor() * 10.0) as i64
}

fn compute_stats(series: &VecDeque<Sample>, recent: usize) -> Option<MetricStats> {
    if series.is_empty() {
        return None;
    }

    let mut values: Vec<f64> = series.iter().map(|s| s.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));

    let len = values.len();
    let at = |q: f64| values[((len as f64 * q).floor() as usize).min(len - 1)];

    Some(MetricStats {
        count: len,
        min: values[0],
        max: values[len - 1],
        avg: values.iter().sum::<f64>() / len as f64,
        median: values[len / 2],
        p95: at(0.95),
        p99: at(0.99),
        recent: series
            .iter()
            .skip(len.saturating_sub(recent))
            .map(|s| MetricSample {
                value: s.value,
                timestamp: s.timestamp,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsConfig::default())
    }

    #[test]
    fn test_histogram_bucketing() {
        let metrics = collector();
        metrics.record_histogram("t", 23.0);
        metrics.record_histogram("t", 29.0);
        metrics.record_histogram("t", 31.0);

        let histogram = metrics.histogram("t");
        assert_eq!(histogram.get(&20), Some(&2));
        assert_eq!(histogram.get(&30), Some(&1));
    }

    #[test]
    fn test_histogram_buckets_per_width_ten() {
        let metrics = collector();
        metrics.record_histogram("t", 5.0);
        metrics.record_histogram("t", 14.0);
        metrics.record_histogram("t", 25.0);

        let expected: BTreeMap<i64, u64> = [(0, 1), (10, 1), (20, 1)].into_iter().collect();
        assert_eq!(metrics.histogram("t"), expected);
    }

    #[test]
    fn test_histogram_bucket_edges() {
        assert_eq!(histogram_bucket(0.0), 0);
        assert_eq!(histogram_bucket(9.99), 0);
        assert_eq!(histogram_bucket(10.0), 10);
        assert_eq!(histogram_bucket(-3.0), -10);
    }

    #[test]
    fn test_counters() {
        let metrics = collector();
        metrics.increment_counter("hits", 1);
        metrics.increment_counter("hits", 4);
        assert_eq!(metrics.counter("hits"), 5);
        assert_eq!(metrics.counter("never"), 0);
    }

    #[test]
    fn test_stats_over_samples() {
        let metrics = collector();
        for v in 1..=100 {
            metrics.record_metric("latency", v as f64);
        }

        let stats = metrics.get_metric_stats("latency").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert!((stats.avg - 50.5).abs() < f64::EPSILON);
        assert_eq!(stats.median, 51.0);
        assert_eq!(stats.p95, 96.0);
        assert_eq!(stats.p99, 100.0);
        assert_eq!(stats.recent.len(), 10);
        assert_eq!(stats.recent.first().unwrap().value, 91.0);
        assert_eq!(stats.recent.last().unwrap().value, 100.0);
    }

    #[test]
    fn test_single_sample_stats() {
        let metrics = collector();
        metrics.record_metric("once", 7.0);
        let stats = metrics.get_metric_stats("once").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.median, 7.0);
        assert_eq!(stats.p95, 7.0);
        assert_eq!(stats.p99, 7.0);
    }

    #[test]
    fn test_series_capped_at_max_samples() {
        let metrics = collector();
        for v in 0..1500 {
            metrics.record_metric("bounded", v as f64);
        }

        let stats = metrics.get_metric_stats("bounded").unwrap();
        assert_eq!(stats.count, 1000);
        // oldest 500 dropped
        assert_eq!(stats.min, 500.0);
        assert_eq!(stats.max, 1499.0);
    }

    #[test]
    fn test_unknown_metric_has_no_stats() {
        assert!(collector().get_metric_stats("missing").is_none());
    }

    #[test]
    fn test_end_timer_without_start() {
        let metrics = collector();
        assert_eq!(metrics.end_timer("never_started"), None);
        assert!(metrics.get_metric_stats("never_started").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_records_duration() {
        let metrics = collector();
        metrics.start_timer("query");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let elapsed = metrics.end_timer("query").unwrap();

        assert!(elapsed >= 40.0);
        assert_eq!(metrics.get_metric_stats("query").unwrap().count, 1);
        // timer consumed
        assert_eq!(metrics.end_timer("query"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_purges_old_samples() {
        let metrics = collector();
        metrics.record_metric("old", 1.0);
        metrics.record_metric("old", 2.0);
        tokio::time::sleep(Duration::from_secs(120)).await;
        metrics.record_metric("old", 3.0);
        metrics.record_metric("fresh", 4.0);

        let purged = metrics.cleanup(Duration::from_secs(60));
        assert_eq!(purged, 2);
        assert_eq!(metrics.get_metric_stats("old").unwrap().count, 1);
        assert_eq!(metrics.get_metric_stats("fresh").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_measure_counts_outcomes() {
        let metrics = collector();

        let ok: std::result::Result<u32, String> =
            metrics.measure("risk_score", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: std::result::Result<u32, String> = metrics
            .measure("risk_score", async { Err("db down".to_string()) })
            .await;
        assert!(err.is_err());

        assert_eq!(metrics.counter("risk_score_success"), 1);
        assert_eq!(metrics.counter("risk_score_error"), 1);
        assert_eq!(metrics.get_metric_stats("risk_score").unwrap().count, 2);
    }

    #[test]
    fn test_snapshot_and_json_export() {
        let metrics = collector();
        metrics.increment_counter("cache_hits", 3);
        metrics.record_histogram("api_response_time", 12.0);
        metrics.record_metric("aggregation_time", 5.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters.get("cache_hits"), Some(&3));
        assert_eq!(snapshot.metrics.get("aggregation_time").unwrap().count, 1);

        let json: serde_json::Value = serde_json::from_str(&metrics.export_json()).unwrap();
        assert_eq!(json["counters"]["cache_hits"], 3);
        assert_eq!(json["histograms"]["api_response_time"]["10"], 1);
    }

    #[test]
    fn test_track_db_query() {
        let metrics = collector();
        metrics.track_db_query("SELECT * FROM grades", Duration::from_millis(12));
        metrics.track_db_query("SELECT * FROM attendance", Duration::from_millis(640));

        assert_eq!(metrics.counter("db_queries_total"), 2);
        let histogram = metrics.histogram("db_query_time");
        assert_eq!(histogram.get(&10), Some(&1));
        assert_eq!(histogram.get(&640), Some(&1));
    }

    #[test]
    fn test_reset() {
        let metrics = collector();
        metrics.increment_counter("a", 1);
        metrics.record_metric("b", 1.0);
        metrics.reset();
        assert_eq!(metrics.counter("a"), 0);
        assert!(metrics.get_metric_stats("b").is_none());
    }
}
