//! Worker agent counters.
//!
//! All metrics follow Prometheus naming conventions:
//! - `worker_` prefix
//! - `_total` suffix for counters
//!
//! The binary installs a Prometheus recorder at startup with
//! [`install_recorder`]; the scrape text is served over RPC by the node
//! controller's `getMetrics` method.
//!
//! # Cardinality
//!
//! - `message`: 4 values (READY, IMOK, ERROR, ambiguous purpose)
//! - `reason`: 4 values (abnormal, error, quit, other)
//! - `stage`: 5 values (connect, rpc_client, dispatch, rpc_server, monitor)

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the process-wide Prometheus recorder.
///
/// Must run before any metric is recorded.
///
/// # Errors
///
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record one heartbeat delivered to the parent.
///
/// Metric: `worker_heartbeats_total`
pub fn record_heartbeat() {
    counter!("worker_heartbeats_total").increment(1);
}

/// Record one message queued on the upstream channel.
///
/// Metric: `worker_upstream_messages_total`
/// Labels: `message`
pub fn record_upstream(message: &'static str) {
    counter!("worker_upstream_messages_total", "message" => message).increment(1);
}

/// Record one inbound monitor event and whether it reached the controller.
///
/// Metric: `worker_monitor_events_total`
/// Labels: `reason`, `forwarded`
pub fn record_monitor_event(reason: &'static str, forwarded: bool) {
    counter!(
        "worker_monitor_events_total",
        "reason" => reason,
        "forwarded" => if forwarded { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a setup chain failure.
///
/// Metric: `worker_setup_failures_total`
/// Labels: `stage`
pub fn record_setup_failure(stage: &'static str) {
    counter!("worker_setup_failures_total", "stage" => stage).increment(1);
}
