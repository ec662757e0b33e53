//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_courier_core::EngineStats;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_SUBMITTED: &str = "courier_messages_submitted_total";
    pub const MESSAGES_REJECTED: &str = "courier_messages_rejected_total";
    pub const MESSAGES_STORED: &str = "courier_messages_stored";
    pub const CONVERSATIONS_ACTIVE: &str = "courier_conversations_active";
    pub const TIMESTAMPS_CLAMPED: &str = "courier_timestamps_clamped";
    pub const SINK_FAILURES: &str = "courier_sink_failures";
    pub const ROOMS_ACTIVE: &str = "courier_rooms_active";
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const LATENCY_SECONDS: &str = "courier_submit_latency_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_SUBMITTED,
        "Messages accepted, by origin (http or ws)"
    );
    metrics::describe_counter!(
        names::MESSAGES_REJECTED,
        "Messages rejected by validation, by origin"
    );
    metrics::describe_gauge!(names::MESSAGES_STORED, "Messages currently retained");
    metrics::describe_gauge!(
        names::CONVERSATIONS_ACTIVE,
        "Conversations with at least one message"
    );
    metrics::describe_gauge!(
        names::TIMESTAMPS_CLAMPED,
        "Submissions whose timestamp was older than the conversation's recency"
    );
    metrics::describe_gauge!(names::SINK_FAILURES, "Failed fan-out deliveries");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Conversations with live listeners");
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of WebSocket connections"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Message submission latency in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted submission.
pub fn record_submitted(origin: &'static str, seconds: f64) {
    counter!(names::MESSAGES_SUBMITTED, "origin" => origin).increment(1);
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a rejected submission.
pub fn record_rejected(origin: &'static str) {
    counter!(names::MESSAGES_REJECTED, "origin" => origin).increment(1);
}

/// Publish engine statistics as gauges.
pub fn record_engine_stats(stats: &EngineStats) {
    gauge!(names::MESSAGES_STORED).set(stats.message_count as f64);
    gauge!(names::CONVERSATIONS_ACTIVE).set(stats.conversation_count as f64);
    gauge!(names::TIMESTAMPS_CLAMPED).set(stats.clamped_timestamps as f64);
    gauge!(names::SINK_FAILURES).set(stats.sink_failures as f64);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Metrics guard that records a WebSocket disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op and must not panic.
        let _guard = ConnectionMetricsGuard::new();
        record_submitted("http", 0.001);
        record_rejected("ws");
        set_active_rooms(3);
        record_engine_stats(&EngineStats {
            conversation_count: 1,
            message_count: 2,
            clamped_timestamps: 0,
            sink_failures: 0,
        });
    }
}
