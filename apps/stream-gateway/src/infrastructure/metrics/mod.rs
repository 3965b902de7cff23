//! Prometheus Metrics Module
//!
//! Exposes gateway metrics in Prometheus format, rendered at `/metrics`
//! on the health server port.
//!
//! # Metrics Categories
//!
//! - **Messages**: frames received/sent by wire type, dropped sends
//! - **Connection**: state gauge and reconnect counter
//! - **Cache**: hit/miss/eviction counters and size gauge

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::cache::CacheMetrics;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "dsky_gateway_messages_received_total",
        "Total frames received from the stream by type"
    );
    describe_counter!(
        "dsky_gateway_messages_sent_total",
        "Total frames written to the stream by type"
    );
    describe_counter!(
        "dsky_gateway_dropped_sends_total",
        "Sends dropped because the outbound queue was full"
    );
    describe_counter!(
        "dsky_gateway_reconnects_total",
        "Reconnect attempts scheduled"
    );

    describe_gauge!(
        "dsky_gateway_connection_state",
        "Connection state (1 for the active state label, 0 otherwise)"
    );

    describe_counter!("dsky_gateway_cache_hits_total", "Cache lookup hits");
    describe_counter!("dsky_gateway_cache_misses_total", "Cache lookup misses");
    describe_counter!("dsky_gateway_cache_evictions_total", "Cache evictions");
    describe_gauge!("dsky_gateway_cache_size", "Entries currently cached");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const CONNECTION_STATES: &[&str] = &[
    "disconnected",
    "connecting",
    "connected",
    "reconnecting",
    "error",
];

/// Record one received frame.
pub fn record_message_received(message_type: &'static str) {
    counter!(
        "dsky_gateway_messages_received_total",
        "message_type" => message_type
    )
    .increment(1);
}

/// Record one written frame.
pub fn record_message_sent(message_type: &'static str) {
    counter!(
        "dsky_gateway_messages_sent_total",
        "message_type" => message_type
    )
    .increment(1);
}

/// Record a send dropped by the full outbound queue.
pub fn record_dropped_send() {
    counter!("dsky_gateway_dropped_sends_total").increment(1);
}

/// Record a scheduled reconnect attempt.
pub fn record_reconnect() {
    counter!("dsky_gateway_reconnects_total").increment(1);
}

/// Update the connection state gauge: 1 for the active state, 0 for the
/// rest.
pub fn set_connection_state(active: &'static str) {
    for state in CONNECTION_STATES {
        let value = f64::from(u8::from(*state == active));
        gauge!("dsky_gateway_connection_state", "state" => *state).set(value);
    }
}

/// Publish a cache accounting snapshot.
#[allow(clippy::cast_precision_loss)]
pub fn publish_cache_metrics(snapshot: &CacheMetrics) {
    counter!("dsky_gateway_cache_hits_total").absolute(snapshot.hits);
    counter!("dsky_gateway_cache_misses_total").absolute(snapshot.misses);
    counter!("dsky_gateway_cache_evictions_total").absolute(snapshot.evictions);
    gauge!("dsky_gateway_cache_size").set(snapshot.size as f64);
}

// =============================================================================
// Tests
// =============================================================================
