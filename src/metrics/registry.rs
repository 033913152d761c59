// src/metrics/registry.rs
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A label set's deterministic identity: sorted `(name, value)` pairs, so
/// `{a=1,b=2}` and `{b=2,a=1}` collide on the same entry.
type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort_by(|a, b| a.0.cmp(&b.0));
    key
}

#[derive(Debug, Default, Clone)]
struct Counter {
    value: u64,
}

#[derive(Debug, Default, Clone)]
struct Histogram {
    values: Vec<f64>,
}

impl Histogram {
    fn record(&mut self, value: f64) {
        self.values.push(value);
    }

    fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn min(&self) -> f64 {
        self.values.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    fn max(&self) -> f64 {
        self.values
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// `sorted[min(floor(len * p / 100), len - 1)]`, per spec.
    fn percentile(&self, p: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64) * p / 100.0).floor() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn percentiles(&self) -> [(&'static str, f64); 4] {
        [
            ("p50", self.percentile(50.0)),
            ("p90", self.percentile(90.0)),
            ("p95", self.percentile(95.0)),
            ("p99", self.percentile(99.0)),
        ]
    }
}

#[derive(Debug, Default, Clone)]
struct Gauge {
    value: f64,
}

#[derive(Default)]
struct Registry {
    counters: HashMap<String, HashMap<LabelKey, Counter>>,
    histograms: HashMap<String, HashMap<LabelKey, Histogram>>,
    gauges: HashMap<String, HashMap<LabelKey, Gauge>>,
}

/// Thread-safe metrics registry keyed by `(metric_name, sorted_label_tuple)`.
///
/// Three independent families behind one lock — counters, histograms
/// (exact-sample, for precise percentiles), gauges — exported either as a
/// structured snapshot or as Prometheus text. This registry owns its own
/// mutex, separate from the pool's, so emitting a metric never risks lock
/// inversion with pool state (see `pool::pool`, which always emits after
/// releasing the pool lock).
pub struct MetricsRegistry {
    inner: Mutex<Registry>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
        }
    }

    pub async fn increment(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        let key = label_key(labels);
        let mut reg = self.inner.lock().await;
        reg.counters
            .entry(name.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .value += value;
    }

    pub async fn record(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = label_key(labels);
        let mut reg = self.inner.lock().await;
        reg.histograms
            .entry(name.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .record(value);
    }

    pub async fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = label_key(labels);
        let mut reg = self.inner.lock().await;
        reg.gauges
            .entry(name.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .value = value;
    }

    pub async fn inc_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = label_key(labels);
        let mut reg = self.inner.lock().await;
        reg.gauges
            .entry(name.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .value += value;
    }

    pub async fn dec_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = label_key(labels);
        let mut reg = self.inner.lock().await;
        reg.gauges
            .entry(name.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .value -= value;
    }

    // Thin, named helpers over the generic primitives above, so pool/health
    // call sites don't hand-format label maps inline.

    pub async fn record_proxy_request(&self, method: &str, backend: &str, status: &str) {
        self.increment(
            "backend.requests.total",
            &[("backend", backend), ("method", method), ("status", status)],
            1,
        )
        .await;
    }

    pub async fn record_proxy_error(&self, backend: &str) {
        self.increment("backend.errors.total", &[("backend", backend)], 1)
            .await;
    }

    pub async fn record_backend_latency_ms(&self, backend: &str, duration_ms: f64) {
        self.record("backend.latency.ms", &[("backend", backend)], duration_ms)
            .await;
    }

    /// `status` is one of `healthy`/`unhealthy`/`error` — a completed probe
    /// that came back unhealthy is not the same outcome as a probe that
    /// never completed at all, and callers must distinguish the two.
    pub async fn record_health_probe(&self, backend: &str, latency_ms: f64, status: &str) {
        self.record(
            "backend.health_check.latency.ms",
            &[("backend", backend)],
            latency_ms,
        )
        .await;
        self.increment(
            "backend.health_check.total",
            &[("backend", backend), ("status", status)],
            1,
        )
        .await;
    }

    pub async fn record_health_probe_error(&self, backend: &str) {
        self.increment("backend.health_check.errors", &[("backend", backend)], 1)
            .await;
    }

    /// Structured `{counters|histograms|gauges -> name -> label-map -> value}`
    /// snapshot, ready for `serde_json::to_vec`.
    pub async fn snapshot(&self) -> Value {
        let reg = self.inner.lock().await;
        let mut counters = serde_json::Map::new();
        for (name, by_labels) in &reg.counters {
            let mut entries = serde_json::Map::new();
            for (key, counter) in by_labels {
                entries.insert(labels_json_key(key), Value::from(counter.value));
            }
            counters.insert(name.clone(), Value::Object(entries));
        }

        let mut histograms = serde_json::Map::new();
        for (name, by_labels) in &reg.histograms {
            let mut entries = serde_json::Map::new();
            for (key, hist) in by_labels {
                entries.insert(labels_json_key(key), histogram_summary(hist));
            }
            histograms.insert(name.clone(), Value::Object(entries));
        }

        let mut gauges = serde_json::Map::new();
        for (name, by_labels) in &reg.gauges {
            let mut entries = serde_json::Map::new();
            for (key, gauge) in by_labels {
                entries.insert(labels_json_key(key), json_f64(gauge.value));
            }
            gauges.insert(name.clone(), Value::Object(entries));
        }

        serde_json::json!({
            "counters": counters,
            "histograms": histograms,
            "gauges": gauges,
        })
    }

    /// Prometheus text exposition. Metric names are prefixed `lb_` and dots
    /// replaced with underscores; histogram percentile/sum/count lines are
    /// only emitted when `count > 0`.
    pub async fn export_prometheus(&self) -> String {
        let reg = self.inner.lock().await;
        let mut lines = Vec::new();

        for (name, by_labels) in &reg.counters {
            let metric = prom_name(name);
            for (key, counter) in by_labels {
                let suffix = prom_labels(key);
                lines.push(format!("{metric}_total{suffix} {}", counter.value));
            }
        }

        for (name, by_labels) in &reg.histograms {
            let metric = prom_name(name);
            for (key, hist) in by_labels {
                if hist.count() == 0 {
                    continue;
                }
                let suffix = prom_labels(key);
                lines.push(format!("{metric}_sum{suffix} {}", round3(hist.sum())));
                lines.push(format!("{metric}_count{suffix} {}", hist.count()));
                for (p, v) in hist.percentiles() {
                    lines.push(format!("{metric}_{p}{suffix} {v}"));
                }
            }
        }

        for (name, by_labels) in &reg.gauges {
            let metric = prom_name(name);
            for (key, gauge) in by_labels {
                let suffix = prom_labels(key);
                lines.push(format!("{metric}{suffix} {}", gauge.value));
            }
        }

        lines.join("\n")
    }

    pub async fn reset(&self) {
        let mut reg = self.inner.lock().await;
        reg.counters.clear();
        reg.histograms.clear();
        reg.gauges.clear();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prom_name(name: &str) -> String {
    format!("lb_{}", name.replace('.', "_"))
}

fn prom_labels(key: &LabelKey) -> String {
    if key.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = key.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    format!("{{{}}}", pairs.join(","))
}

fn labels_json_key(key: &LabelKey) -> String {
    if key.is_empty() {
        return "{}".to_string();
    }
    let pairs: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.join(",")
}

fn histogram_summary(hist: &Histogram) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("count".to_string(), Value::from(hist.count()));
    obj.insert("sum".to_string(), json_f64(round3(hist.sum())));
    obj.insert(
        "min".to_string(),
        json_f64(if hist.values.is_empty() { 0.0 } else { hist.min() }),
    );
    obj.insert(
        "max".to_string(),
        json_f64(if hist.values.is_empty() { 0.0 } else { hist.max() }),
    );
    for (p, v) in hist.percentiles() {
        obj.insert(p.to_string(), json_f64(v));
    }
    Value::Object(obj)
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn label_set_equality_is_order_insensitive() {
        let reg = MetricsRegistry::new();
        reg.increment("requests", &[("a", "1"), ("b", "2")], 1).await;
        reg.increment("requests", &[("b", "2"), ("a", "1")], 1).await;

        let snap = reg.snapshot().await;
        let counters = snap["counters"]["requests"].as_object().unwrap();
        assert_eq!(counters.len(), 1);
        let (_, value) = counters.iter().next().unwrap();
        assert_eq!(value.as_u64(), Some(2));
    }

    #[tokio::test]
    async fn percentile_uses_floor_len_times_p_over_100() {
        let reg = MetricsRegistry::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            reg.record("latency", &[], v).await;
        }
        let snap = reg.snapshot().await;
        let entry = snap["histograms"]["latency"]["{}"].clone();
        // len=4, p50 -> floor(4*50/100)=2 -> sorted[2] = 3.0
        assert_eq!(entry["p50"], 3.0);
        assert_eq!(entry["count"], 4);
    }

    #[tokio::test]
    async fn prometheus_text_uses_lb_prefix_and_underscored_dots() {
        let reg = MetricsRegistry::new();
        reg.increment("backend.requests.total", &[("backend", "b1")], 3)
            .await;
        let text = reg.export_prometheus().await;
        assert!(text.contains("lb_backend_requests_total_total{backend=\"b1\"} 3"));
    }

    #[tokio::test]
    async fn histogram_lines_are_omitted_when_count_is_zero() {
        let reg = MetricsRegistry::new();
        // force the histogram to exist with no samples by recording then
        // resetting is not representative; instead assert a name never
        // recorded produces no lines at all.
        let text = reg.export_prometheus().await;
        assert!(!text.contains("_sum"));
        assert!(!text.contains("_count"));
    }

    #[tokio::test]
    async fn reset_clears_all_three_families() {
        let reg = MetricsRegistry::new();
        reg.increment("c", &[], 1).await;
        reg.record("h", &[], 1.0).await;
        reg.set_gauge("g", &[], 1.0).await;
        reg.reset().await;
        let snap = reg.snapshot().await;
        assert!(snap["counters"].as_object().unwrap().is_empty());
        assert!(snap["histograms"].as_object().unwrap().is_empty());
        assert!(snap["gauges"].as_object().unwrap().is_empty());
    }
}
