//! Metrics collection and exposition.
//!
//! # Metrics
//! - `broker_dispatch_sends_total` (counter): finished sends by destination type, outcome
//! - `broker_dispatch_send_duration_seconds` (histogram): time from task start to outcome
//! - `broker_dispatch_reconnects_total` (counter): reconnects by result
//! - `broker_dispatch_circuit_rejections_total` (counter): sends denied by a breaker
//! - `broker_dispatch_pending` (gauge): submitted sends not yet finished
//!
//! Updates go through the `metrics` facade and are free when no recorder is
//! installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start a Prometheus scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_send(destination_type: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(
        "broker_dispatch_sends_total",
        "destination_type" => destination_type,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("broker_dispatch_send_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_reconnect(success: bool) {
    let result = if success { "ok" } else { "failed" };
    metrics::counter!("broker_dispatch_reconnects_total", "result" => result).increment(1);
}

pub fn record_circuit_rejection(circuit: &str) {
    metrics::counter!(
        "broker_dispatch_circuit_rejections_total",
        "circuit" => circuit.to_string()
    )
    .increment(1);
}

pub fn record_pending(pending: usize) {
    metrics::gauge!("broker_dispatch_pending").set(pending as f64);
}
