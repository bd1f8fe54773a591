//! Prometheus metrics for the cache client

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

/// Client-side counters, one registry per loaded client
pub struct Metrics {
    pub registry: Registry,

    // Command counters
    pub cmd_get: IntCounter,
    pub cmd_set: IntCounter,
    pub cmd_add: IntCounter,
    pub cmd_replace: IntCounter,
    pub cmd_append: IntCounter,
    pub cmd_prepend: IntCounter,
    pub cmd_delete: IntCounter,
    pub cmd_incr: IntCounter,
    pub cmd_decr: IntCounter,
    pub cmd_flush: IntCounter,
    pub cmd_get_multi: IntCounter,

    // Hit/miss counters
    pub get_hits: IntCounter,
    pub get_misses: IntCounter,

    // Write buffering
    pub buffered_writes: IntCounter,
    pub drains: IntCounter,
    pub drain_failures: IntCounter,

    pub cmd_latency: Histogram,

    /// Failures reported as warnings instead of errors
    pub transient_errors: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(format!("embedcache_{name}"), help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let cmd_get = counter("cmd_get_total", "Total get calls")?;
        let cmd_set = counter("cmd_set_total", "Total set calls")?;
        let cmd_add = counter("cmd_add_total", "Total add calls")?;
        let cmd_replace = counter("cmd_replace_total", "Total replace calls")?;
        let cmd_append = counter("cmd_append_total", "Total append calls")?;
        let cmd_prepend = counter("cmd_prepend_total", "Total prepend calls")?;
        let cmd_delete = counter("cmd_delete_total", "Total delete calls")?;
        let cmd_incr = counter("cmd_incr_total", "Total incr calls")?;
        let cmd_decr = counter("cmd_decr_total", "Total decr calls")?;
        let cmd_flush = counter("cmd_flush_total", "Total flush_all calls")?;
        let cmd_get_multi = counter("cmd_get_multi_total", "Total multi-get calls")?;

        let get_hits = counter("get_hits_total", "Keys found by get and multi-get")?;
        let get_misses = counter("get_misses_total", "Keys missed by get")?;

        let buffered_writes = counter(
            "buffered_writes_total",
            "Writes accepted without a server acknowledgment",
        )?;
        let drains = counter("drains_total", "Commit-time drains of buffered writes")?;
        let drain_failures = counter("drain_failures_total", "Drains that failed")?;

        let transient_errors = counter(
            "transient_errors_total",
            "Cache failures reported as warnings",
        )?;

        let cmd_latency = Histogram::with_opts(
            HistogramOpts::new("embedcache_cmd_latency_seconds", "Command latency in seconds")
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ]),
        )?;
        registry.register(Box::new(cmd_latency.clone()))?;

        Ok(Self {
            registry,
            cmd_get,
            cmd_set,
            cmd_add,
            cmd_replace,
            cmd_append,
            cmd_prepend,
            cmd_delete,
            cmd_incr,
            cmd_decr,
            cmd_flush,
            cmd_get_multi,
            get_hits,
            get_misses,
            buffered_writes,
            drains,
            drain_failures,
            cmd_latency,
            transient_errors,
        })
    }

    /// Prometheus text exposition of every metric
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
