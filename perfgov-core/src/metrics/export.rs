//! Line-oriented text export (`name value`, one metric per line) and the
//! JSON fallback shared by the collector.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;
use tracing::warn;

use super::collector::MetricsSnapshot;

/// Replace every character outside `[a-zA-Z0-9_]` with `_`
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Exported view of one sample series after name sanitization
#[derive(Debug, Clone, Copy, PartialEq)]
struct SeriesLine {
    count: usize,
    avg: f64,
    p95: f64,
}

impl SeriesLine {
    /// Fold a colliding series in: counts add, avg is count-weighted,
    /// p95 keeps the larger value
    fn merge(&mut self, other: SeriesLine) {
        let total = self.count + other.count;
        if total > 0 {
            self.avg =
                (self.avg * self.count as f64 + other.avg * other.count as f64) / total as f64;
        }
        self.count = total;
        self.p95 = self.p95.max(other.p95);
    }
}

/// Render `snapshot` ordered by exported name
///
/// Distinct raw names that sanitize to the same name (`a/b`, `a_b`) are
/// merged into a single line per exported name.
pub(crate) fn render_text(namespace: &str, snapshot: &MetricsSnapshot) -> String {
    let mut counters: BTreeMap<String, u64> = BTreeMap::new();
    for (name, value) in &snapshot.counters {
        *counters.entry(sanitize_metric_name(name)).or_default() += value;
    }

    let mut histograms: BTreeMap<String, BTreeMap<i64, u64>> = BTreeMap::new();
    for (name, buckets) in &snapshot.histograms {
        let merged = histograms.entry(sanitize_metric_name(name)).or_default();
        for (bucket, count) in buckets {
            *merged.entry(*bucket).or_default() += count;
        }
    }

    let mut series: BTreeMap<String, SeriesLine> = BTreeMap::new();
    for (name, stats) in &snapshot.metrics {
        let line = SeriesLine {
            count: stats.count,
            avg: stats.avg,
            p95: stats.p95,
        };
        series
            .entry(sanitize_metric_name(name))
            .and_modify(|existing| existing.merge(line))
            .or_insert(line);
    }

    let mut output = String::new();

    // writing into a String cannot fail
    for (name, value) in &counters {
        let _ = writeln!(output, "{}_counter_{} {}", namespace, name, value);
    }

    for (name, buckets) in &histograms {
        for (bucket, count) in buckets {
            let _ = writeln!(
                output,
                "{}_histogram_{}_bucket{{le=\"{}\"}} {}",
                namespace, name, bucket, count
            );
        }
    }

    for (name, line) in &series {
        let _ = writeln!(output, "{}_metric_{}_count {}", namespace, name, line.count);
        let _ = writeln!(output, "{}_metric_{}_avg {}", namespace, name, line.avg);
        let _ = writeln!(output, "{}_metric_{}_p95 {}", namespace, name, line.p95);
    }

    output
}

/// Serialize `value` as JSON, falling back to `"{}"` with a warning
pub(crate) fn to_json_or_empty<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("Metrics serialization failed, exporting empty payload: {}", e);
            "{}".to_string()
        }
    }
}
