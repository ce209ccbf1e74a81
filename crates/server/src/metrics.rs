//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the relay server:
//! - HTTP request metrics (latency, counts, auth failures)
//! - WebSocket media channel metrics
//! - Relay occupancy (collected dynamically)
//! - Core transcoder metrics, registered from `relay_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::error;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "relay_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relay_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relay_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures on the operator API.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relay_auth_failures_total", "Total authentication failures"),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Open media channels.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relay_ws_connections_active",
        "Number of open WebSocket media channels",
    )
    .unwrap()
});

/// Media channels opened since startup.
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relay_ws_connections_total",
        "Total WebSocket media channels since startup",
    )
    .unwrap()
});

/// Frames sent to clients, by event.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relay_ws_messages_sent_total", "WebSocket messages sent"),
        &["event"],
    )
    .unwrap()
});

/// Frames received from clients, by event.
pub static WS_MESSAGES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "relay_ws_messages_received_total",
            "WebSocket messages received",
        ),
        &["event"],
    )
    .unwrap()
});

/// Bytes of media received from clients.
pub static WS_MEDIA_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relay_ws_media_bytes_total",
        "Bytes of media received over WebSocket",
    )
    .unwrap()
});

/// Text frames that could not be decoded.
pub static WS_DECODE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relay_ws_decode_errors_total",
        "WebSocket text frames that could not be decoded",
    )
    .unwrap()
});

// =============================================================================
// Relay Metrics (collected dynamically)
// =============================================================================

/// Registered relay connections.
pub static RELAY_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relay_connections",
        "Number of connections in the relay registry",
    )
    .unwrap()
});

/// Transcode slots currently held.
pub static RELAY_TRANSCODE_SLOTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relay_transcode_slots_held",
        "Transcode slots currently held (running or exiting)",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_RECEIVED.clone()))
        .unwrap();
    registry.register(Box::new(WS_MEDIA_BYTES.clone())).unwrap();
    registry
        .register(Box::new(WS_DECODE_ERRORS.clone()))
        .unwrap();

    // Relay
    registry
        .register(Box::new(RELAY_CONNECTIONS.clone()))
        .unwrap();
    registry
        .register(Box::new(RELAY_TRANSCODE_SLOTS.clone()))
        .unwrap();

    // Core metrics (transcoders, admission, errors)
    for metric in relay_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges that mirror relay state.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let relay = state.relay();
    RELAY_CONNECTIONS.set(relay.connection_count().await as i64);
    RELAY_TRANSCODE_SLOTS.set(relay.active_transcodes() as i64);
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Normalize a path for metric labels (replace connection ids with a placeholder).
pub fn normalize_path(path: &str) -> String {
    UUID_SEGMENT.replace_all(path, "{id}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/connections/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/connections/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/ws"), "/ws");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("relay_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_server_and_core_metrics() {
        WS_CONNECTIONS_ACTIVE.set(0);
        WS_CONNECTIONS_TOTAL.inc();
        WS_MESSAGES_SENT.with_label_values(&["ack"]).inc();
        RELAY_CONNECTIONS.set(0);
        relay_core::metrics::TRANSCODES_STARTED.inc();
        relay_core::metrics::START_REJECTIONS
            .with_label_values(&["limit"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("relay_ws_connections_active"));
        assert!(output.contains("relay_ws_connections_total"));
        assert!(output.contains("relay_ws_messages_sent_total"));
        assert!(output.contains("relay_connections"));
        assert!(output.contains("relay_transcodes_started_total"));
        assert!(output.contains("relay_start_rejections_total"));
    }
}
