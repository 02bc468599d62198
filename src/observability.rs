//! Metric names and the optional Prometheus exporter.

pub const BOOKING_REQUESTS_TOTAL: &str = "keja_booking_requests_total";
pub const BOOKING_CONFLICTS_TOTAL: &str = "keja_booking_conflicts_total";
pub const MAIL_SENT_TOTAL: &str = "keja_mail_sent_total";
pub const MAIL_FAILURES_TOTAL: &str = "keja_mail_failures_total";
pub const WAL_FLUSH_DURATION_SECONDS: &str = "keja_wal_flush_duration_seconds";
pub const WAL_FLUSH_BATCH_SIZE: &str = "keja_wal_flush_batch_size";

/// Install the Prometheus exporter when a metrics port is configured.
/// Without one, metric macros record into the void at negligible cost.
pub fn init(metrics_port: Option<u16>) {
    let Some(port) = metrics_port else {
        return;
    };
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::warn!(%addr, error = %e, "failed to start metrics exporter");
    } else {
        tracing::info!(%addr, "metrics exporter listening");
    }
}
