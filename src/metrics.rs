//! Prometheus metrics for the gateway (SPEC_FULL §10.5).
//!
//! Grounded in the teacher's metrics module: same `lazy_static` +
//! `prometheus` registration pattern and `/metrics` warp route, with the
//! gauges/histograms swapped for this gateway's own concerns (connections,
//! auth, per-session queue depth, delivery latency, discovery).

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use warp::Filter;

lazy_static! {
    /// Active WebSocket connections.
    pub static ref GATEWAY_CONNECTIONS: Gauge = register_gauge!(
        "epiloop_gateway_connections",
        "Number of active WebSocket connections"
    )
    .unwrap();

    /// Total authentication attempts.
    pub static ref AUTH_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "epiloop_auth_attempts_total",
        "Total number of authentication attempts",
        &["result"]
    )
    .unwrap();

    /// Depth of each session's FIFO mailbox, by session key.
    pub static ref SESSION_QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "epiloop_session_queue_depth",
        "Number of messages queued for delivery to a session",
        &["session_key"]
    )
    .unwrap();

    /// Delivery latency from session-hub dispatch to channel-plugin accept.
    pub static ref DELIVERY_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        "epiloop_delivery_latency_seconds",
        "Latency from dispatch to channel delivery",
        &["channel"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Service discovery registrations (mDNS + wide-area).
    pub static ref DISCOVERY_REGISTRATIONS_TOTAL: CounterVec = register_counter_vec!(
        "epiloop_discovery_registrations_total",
        "Total number of discovery advertisement registrations",
        &["kind"]
    )
    .unwrap();

    /// Retry attempts for transient outbound failures (node RPC, directory lookups).
    pub static ref RETRY_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "epiloop_retry_attempts_total",
        "Total number of outbound retry attempts",
        &["target", "reason"]
    )
    .unwrap();
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` (Prometheus text format) and `/health` (plain `OK`)
/// on `addr` until the returned future is dropped or cancelled by the
/// caller's own select loop.
pub async fn start_metrics_server(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(%addr, "starting metrics server");

    let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();

        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(%err, "failed to encode metrics");
            return warp::reply::with_status(
                "error encoding metrics".to_string(),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            );
        }

        warp::reply::with_status(
            String::from_utf8_lossy(&buffer).to_string(),
            warp::http::StatusCode::OK,
        )
    });

    let health_route = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let routes = metrics_route.or(health_route);
    warp::serve(routes).run(addr).await;
    Ok(())
}

pub fn record_connection_opened() {
    GATEWAY_CONNECTIONS.inc();
}

pub fn record_connection_closed() {
    GATEWAY_CONNECTIONS.dec();
}

pub fn record_auth_attempt(success: bool) {
    let result = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_session_queue_depth(session_key: &str, depth: usize) {
    SESSION_QUEUE_DEPTH
        .with_label_values(&[session_key])
        .set(depth as f64);
}

pub fn record_delivery_latency(channel: &str, seconds: f64) {
    DELIVERY_LATENCY_SECONDS
        .with_label_values(&[channel])
        .observe(seconds);
}

pub fn record_discovery_registration(kind: &str) {
    DISCOVERY_REGISTRATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_retry(target: &str, reason: &str) {
    RETRY_ATTEMPTS_TOTAL.with_label_values(&[target, reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_panicking() {
        let _ = &*GATEWAY_CONNECTIONS;
        let _ = &*AUTH_ATTEMPTS_TOTAL;
        let _ = &*SESSION_QUEUE_DEPTH;
        let _ = &*DELIVERY_LATENCY_SECONDS;
        let _ = &*DISCOVERY_REGISTRATIONS_TOTAL;
        let _ = &*RETRY_ATTEMPTS_TOTAL;
    }

    #[test]
    fn connection_gauge_tracks_open_and_close() {
        let initial = GATEWAY_CONNECTIONS.get();
        record_connection_opened();
        assert_eq!(GATEWAY_CONNECTIONS.get(), initial + 1.0);
        record_connection_closed();
        assert_eq!(GATEWAY_CONNECTIONS.get(), initial);
    }

    #[test]
    fn session_queue_depth_is_set_per_key() {
        set_session_queue_depth("slack:acct:chan", 3);
        assert_eq!(
            SESSION_QUEUE_DEPTH
                .with_label_values(&["slack:acct:chan"])
                .get(),
            3.0
        );
    }
}
