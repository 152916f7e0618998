use std::net::SocketAddr;

use crate::model::BookingAction;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings successfully created.
pub const BOOKINGS_CREATED_TOTAL: &str = "slated_bookings_created_total";

/// Counter: booking creations rejected for a slot conflict.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slated_booking_conflicts_total";

/// Counter: lifecycle transitions. Labels: action, status.
pub const TRANSITIONS_TOTAL: &str = "slated_booking_transitions_total";

/// Counter: settlements flagged for manual reconciliation.
pub const SETTLEMENT_ANOMALIES_TOTAL: &str = "slated_settlement_anomalies_total";

/// Counter: availability queries served.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "slated_availability_queries_total";

/// Histogram: availability query latency in seconds.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "slated_availability_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: providers currently loaded.
pub const PROVIDERS_ACTIVE: &str = "slated_providers_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slated_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slated_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a lifecycle action to a short label for metrics.
pub fn action_label(action: BookingAction) -> &'static str {
    action.as_str()
}
