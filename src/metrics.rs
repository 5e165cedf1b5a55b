//! Counters, gauges, and histograms (spec §4.10), plus a Prometheus text
//! exposition (§11, supplementing the distilled spec's "what to measure"
//! with "how an operator reads it back").
//!
//! Grounded on the teacher's `middleware::metrics::HistogramMetric` /
//! `PathMetrics` idiom: cumulative atomic bucket counts rather than a
//! third-party metrics crate, labeled maps behind a `RwLock`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

/// Shared histogram bucket boundaries, matching the teacher's
/// `HISTOGRAM_BUCKETS` convention (seconds).
const HISTOGRAM_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

struct Histogram {
    /// Cumulative counts: `buckets[i]` counts observations `<= HISTOGRAM_BUCKETS[i]`.
    buckets: Vec<AtomicU64>,
    sum_millis: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: (0..HISTOGRAM_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_millis: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, duration_secs: f64) {
        for (i, bound) in HISTOGRAM_BUCKETS.iter().enumerate() {
            if duration_secs <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_millis
            .fetch_add((duration_secs * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (Vec<u64>, u64, u64) {
        let buckets = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        (
            buckets,
            self.sum_millis.load(Ordering::Relaxed),
            self.count.load(Ordering::Relaxed),
        )
    }
}

#[derive(Default)]
struct LabeledCounters(RwLock<HashMap<String, AtomicU64>>);

impl LabeledCounters {
    fn incr(&self, label: &str) {
        if let Some(c) = self.0.read().unwrap_or_else(|e| e.into_inner()).get(label) {
            c.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut map = self.0.write().unwrap_or_else(|e| e.into_inner());
        map.entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

#[derive(Default)]
struct LabeledGauges(RwLock<HashMap<String, AtomicI64>>);

impl LabeledGauges {
    fn set(&self, label: &str, value: i64) {
        if let Some(g) = self.0.read().unwrap_or_else(|e| e.into_inner()).get(label) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        let mut map = self.0.write().unwrap_or_else(|e| e.into_inner());
        map.entry(label.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<(String, i64)> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

#[derive(Default)]
struct LabeledHistograms(RwLock<HashMap<String, Histogram>>);

impl LabeledHistograms {
    fn observe(&self, label: &str, duration_secs: f64) {
        {
            let map = self.0.read().unwrap_or_else(|e| e.into_inner());
            if let Some(h) = map.get(label) {
                h.observe(duration_secs);
                return;
            }
        }
        let mut map = self.0.write().unwrap_or_else(|e| e.into_inner());
        map.entry(label.to_string())
            .or_insert_with(Histogram::new)
            .observe(duration_secs);
    }

    fn snapshot(&self) -> Vec<(String, Vec<u64>, u64, u64)> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, h)| {
                let (buckets, sum_millis, count) = h.snapshot();
                (k.clone(), buckets, sum_millis, count)
            })
            .collect()
    }
}

/// Process-wide metrics registry. One instance, held behind `Arc` by the
/// composition root and every component that emits metrics.
#[derive(Default)]
pub struct Metrics {
    token_acquired_total: LabeledCounters,
    token_cache_operation_total: LabeledCounters,
    http_request_total: LabeledCounters,
    rate_limit_rejected_total: LabeledCounters,
    circuit_transition_total: LabeledCounters,
    token_acquire_duration: LabeledHistograms,
    upstream_request_duration: LabeledHistograms,
    token_expires_in_seconds: LabeledGauges,
    circuit_state: LabeledGauges,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_token_acquired(&self, server: &str, provider: &str, result: &str) {
        self.token_acquired_total
            .incr(&format!("{server}|{provider}|{result}"));
    }

    pub fn record_cache_operation(&self, server: &str, op: &str) {
        self.token_cache_operation_total.incr(&format!("{server}|{op}"));
    }

    pub fn record_http_request(&self, server: &str, method: &str, status_class: &str) {
        self.http_request_total
            .incr(&format!("{server}|{method}|{status_class}"));
    }

    pub fn record_rate_limit_rejected(&self, key_kind: &str) {
        self.rate_limit_rejected_total.incr(key_kind);
    }

    pub fn record_circuit_transition(&self, server: &str, from: &str, to: &str) {
        self.circuit_transition_total
            .incr(&format!("{server}|{from}|{to}"));
    }

    pub fn observe_token_acquire_duration(
        &self,
        server: &str,
        provider: &str,
        result: &str,
        duration_secs: f64,
    ) {
        self.token_acquire_duration
            .observe(&format!("{server}|{provider}|{result}"), duration_secs);
    }

    pub fn observe_upstream_request_duration(
        &self,
        server: &str,
        method: &str,
        status_class: &str,
        duration_secs: f64,
    ) {
        self.upstream_request_duration
            .observe(&format!("{server}|{method}|{status_class}"), duration_secs);
    }

    pub fn set_token_expires_in(&self, server: &str, seconds: i64) {
        self.token_expires_in_seconds.set(server, seconds);
    }

    pub fn set_circuit_state(&self, server: &str, gauge_value: i64) {
        self.circuit_state.set(server, gauge_value);
    }

    /// Render the Prometheus text exposition format for `GET
    /// /dicomweb-oauth/metrics`.
    pub fn render_prometheus_text(&self) -> String {
        let mut out = String::new();

        render_counter(
            &mut out,
            "oauth_token_acquired_total",
            &["server", "provider", "result"],
            self.token_acquired_total.snapshot(),
        );
        render_counter(
            &mut out,
            "oauth_token_cache_operation_total",
            &["server", "op"],
            self.token_cache_operation_total.snapshot(),
        );
        render_counter(
            &mut out,
            "oauth_http_request_total",
            &["server", "method", "status_class"],
            self.http_request_total.snapshot(),
        );
        render_counter(
            &mut out,
            "oauth_rate_limit_rejected_total",
            &["key_kind"],
            self.rate_limit_rejected_total.snapshot(),
        );
        render_counter(
            &mut out,
            "oauth_circuit_transition_total",
            &["server", "from", "to"],
            self.circuit_transition_total.snapshot(),
        );
        render_gauge(
            &mut out,
            "oauth_token_expires_in_seconds",
            &["server"],
            self.token_expires_in_seconds.snapshot(),
        );
        render_gauge(
            &mut out,
            "oauth_circuit_state",
            &["server"],
            self.circuit_state.snapshot(),
        );
        render_histogram(
            &mut out,
            "oauth_token_acquire_duration_seconds",
            &["server", "provider", "result"],
            self.token_acquire_duration.snapshot(),
        );
        render_histogram(
            &mut out,
            "oauth_upstream_request_duration_seconds",
            &["server", "method", "status_class"],
            self.upstream_request_duration.snapshot(),
        );

        out
    }
}

fn render_counter(out: &mut String, name: &str, label_names: &[&str], values: Vec<(String, u64)>) {
    let _ = writeln!(out, "# TYPE {name} counter");
    for (key, value) in values {
        let labels = render_labels(label_names, &key);
        let _ = writeln!(out, "{name}{{{labels}}} {value}");
    }
}

fn render_gauge(out: &mut String, name: &str, label_names: &[&str], values: Vec<(String, i64)>) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    for (key, value) in values {
        let labels = render_labels(label_names, &key);
        let _ = writeln!(out, "{name}{{{labels}}} {value}");
    }
}

fn render_histogram(
    out: &mut String,
    name: &str,
    label_names: &[&str],
    values: Vec<(String, Vec<u64>, u64, u64)>,
) {
    let _ = writeln!(out, "# TYPE {name} histogram");
    for (key, buckets, sum_millis, count) in values {
        let labels = render_labels(label_names, &key);
        for (bound, cumulative) in HISTOGRAM_BUCKETS.iter().zip(buckets.iter()) {
            let _ = writeln!(out, "{name}_bucket{{{labels},le=\"{bound}\"}} {cumulative}");
        }
        let _ = writeln!(out, "{name}_bucket{{{labels},le=\"+Inf\"}} {count}");
        let _ = writeln!(out, "{name}_sum{{{labels}}} {:.6}", sum_millis as f64 / 1000.0);
        let _ = writeln!(out, "{name}_count{{{labels}}} {count}");
    }
}

fn render_labels(label_names: &[&str], key: &str) -> String {
    let parts: Vec<&str> = key.split('|').collect();
    label_names
        .iter()
        .zip(parts.iter())
        .map(|(name, value)| format!("{name}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_combination() {
        let m = Metrics::new();
        m.record_token_acquired("s1", "generic", "success");
        m.record_token_acquired("s1", "generic", "success");
        m.record_token_acquired("s1", "generic", "failure");
        let text = m.render_prometheus_text();
        assert!(text.contains("oauth_token_acquired_total{server=\"s1\",provider=\"generic\",result=\"success\"} 2"));
        assert!(text.contains("oauth_token_acquired_total{server=\"s1\",provider=\"generic\",result=\"failure\"} 1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let m = Metrics::new();
        m.observe_token_acquire_duration("s1", "generic", "success", 0.02);
        m.observe_token_acquire_duration("s1", "generic", "success", 3.0);
        let text = m.render_prometheus_text();
        assert!(text.contains(
            "oauth_token_acquire_duration_seconds_bucket{server=\"s1\",provider=\"generic\",result=\"success\",le=\"0.025\"} 1"
        ));
        assert!(text.contains(
            "oauth_token_acquire_duration_seconds_bucket{server=\"s1\",provider=\"generic\",result=\"success\",le=\"+Inf\"} 2"
        ));
        assert!(text.contains(
            "oauth_token_acquire_duration_seconds_count{server=\"s1\",provider=\"generic\",result=\"success\"} 2"
        ));
    }

    #[test]
    fn gauges_overwrite_rather_than_accumulate() {
        let m = Metrics::new();
        m.set_token_expires_in("s1", 3600);
        m.set_token_expires_in("s1", 1800);
        let text = m.render_prometheus_text();
        assert!(text.contains("oauth_token_expires_in_seconds{server=\"s1\"} 1800"));
        assert!(!text.contains("3600"));
    }
}
