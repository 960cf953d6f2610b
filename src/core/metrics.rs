// src/core/metrics.rs

//! Defines and registers Prometheus metrics for proxy monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, GaugeVec, HistogramVec, TextEncoder, register_counter_vec, register_gauge_vec,
    register_histogram_vec,
};

lazy_static! {
    // --- Cache Gauges ---
    /// The number of objects tracked by each cache index.
    pub static ref CACHE_OBJECTS: GaugeVec =
        register_gauge_vec!("deltacache_cache_objects", "Number of objects held by a cache.", &["cache"]).unwrap();
    /// The number of payload bytes charged to each cache index.
    pub static ref CACHE_BYTES: GaugeVec =
        register_gauge_vec!("deltacache_cache_bytes", "Payload bytes held by a cache.", &["cache"]).unwrap();

    // --- Counters ---
    /// Requests served by an engine, labeled by the resulting lookup status.
    pub static ref LOOKUPS_TOTAL: CounterVec =
        register_counter_vec!("deltacache_lookups_total", "Requests handled by an engine, by lookup status.", &["engine", "origin", "status"]).unwrap();
    /// Upstream fetches, labeled by outcome (`ok`, `error`, `timeout`).
    pub static ref UPSTREAM_FETCHES_TOTAL: CounterVec =
        register_counter_vec!("deltacache_upstream_fetches_total", "Upstream fetches issued, by outcome.", &["origin", "outcome"]).unwrap();
    /// Requests that attached to another request's in-flight upstream fetch.
    pub static ref FLIGHT_JOINS_TOTAL: CounterVec =
        register_counter_vec!("deltacache_flight_joins_total", "Fetches served by joining an in-flight request.", &["origin"]).unwrap();
    /// Keys removed by the index reaper, labeled by reason (`expired`, `size`).
    pub static ref REAPER_REMOVALS_TOTAL: CounterVec =
        register_counter_vec!("deltacache_reaper_removals_total", "Keys removed by the index reaper.", &["cache", "reason"]).unwrap();
    /// Cache writebacks that failed after a successful fetch.
    pub static ref WRITEBACK_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("deltacache_writeback_failures_total", "Failed cache writebacks.", &["origin"]).unwrap();

    // --- Histograms ---
    /// Latency of individual upstream fetches.
    pub static ref UPSTREAM_LATENCY_SECONDS: HistogramVec =
        register_histogram_vec!("deltacache_upstream_latency_seconds", "Latency of upstream fetches in seconds.", &["origin"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
