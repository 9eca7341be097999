//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_connections_accepted_total` (counter): accepted connections
//! - `tunnel_active_connections` (gauge): in-flight handler invocations
//! - `tunnel_handler_panics_total` (counter): recovered handler panics
//! - `tunnel_accept_errors_total` (counter): unexpected accept failures
//! - `relay_bytes_total` (counter): bytes copied, labelled by direction
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless [`init_metrics`] is called.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and start its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    metrics::counter!("tunnel_connections_accepted_total").increment(1);
}

pub fn record_active_connections(count: u64) {
    metrics::gauge!("tunnel_active_connections").set(count as f64);
}

pub fn record_handler_panic() {
    metrics::counter!("tunnel_handler_panics_total").increment(1);
}

pub fn record_accept_error() {
    metrics::counter!("tunnel_accept_errors_total").increment(1);
}

/// Record bytes copied by one relay direction (`"a_to_b"` or `"b_to_a"`).
pub fn record_relay_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("relay_bytes_total", "direction" => direction).increment(bytes);
}
