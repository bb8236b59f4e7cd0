// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the orchestration daemon.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Instance monitor gauges ---
    /// 1 if this node holds the HA leader role for the labeled path, else 0.
    pub static ref IMON_IS_HA_LEADER: GaugeVec =
        register_gauge_vec!("clustord_imon_is_ha_leader", "Whether this node is the HA leader for a path.", &["path"]).unwrap();
    /// The number of instance monitors currently in a "doing" (transient) state.
    pub static ref IMON_DOING_COUNT: Gauge =
        register_gauge!("clustord_imon_doing_count", "Number of instance monitors currently mid-orchestration.").unwrap();
    /// The number of instance monitors currently in a failed terminal state.
    pub static ref IMON_FAILED_COUNT: Gauge =
        register_gauge!("clustord_imon_failed_count", "Number of instance monitors in a *_failed state.").unwrap();

    // --- Node monitor gauges ---
    /// 1 if the local node is frozen, else 0.
    pub static ref NMON_FROZEN: Gauge =
        register_gauge!("clustord_nmon_frozen", "Whether the local node is frozen (1) or thawed (0).").unwrap();
    /// 1 if a split-brain condition has been observed, else 0.
    pub static ref NMON_SPLIT: Gauge =
        register_gauge!("clustord_nmon_split", "Whether a split-brain condition is currently observed.").unwrap();

    // --- Heartbeat gauges ---
    /// 1 if the labeled (peer, transport) heartbeat is beating, else 0.
    pub static ref HB_PEER_BEATING: GaugeVec =
        register_gauge_vec!("clustord_hb_peer_beating", "Whether a heartbeat transport to a peer is beating.", &["peer", "transport"]).unwrap();

    // --- Orchestration API counters ---
    /// Total SetInstanceMonitor requests accepted, labeled by outcome.
    pub static ref API_SET_MONITOR_TOTAL: CounterVec =
        register_counter_vec!("clustord_api_set_monitor_total", "Total SetInstanceMonitor requests, labeled by outcome.", &["outcome"]).unwrap();
    /// Total events delivered via the bus.
    pub static ref BUS_MESSAGES_PUBLISHED_TOTAL: Counter =
        register_counter!("clustord_bus_messages_published_total", "Total messages published on the event bus.").unwrap();
    /// Total messages dropped because a subscriber was slow.
    pub static ref BUS_SUBSCRIBER_SLOW_TOTAL: Counter =
        register_counter!("clustord_bus_subscriber_slow_total", "Total messages dropped due to a slow subscriber.").unwrap();

    // --- Histograms ---
    /// Latency of the SetInstanceMonitor request/ack round trip.
    pub static ref SET_MONITOR_LATENCY_SECONDS: Histogram =
        register_histogram!("clustord_set_monitor_latency_seconds", "Latency of SetInstanceMonitor ack round trips in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
