//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// Companion connections accepted (counter).
pub const BRIDGE_CONNECTIONS_TOTAL: &str = "bridge_connections_total";
/// Companion disconnections (counter).
pub const BRIDGE_DISCONNECTIONS_TOTAL: &str = "bridge_disconnections_total";
/// Requests written to companions (counter, labels: method).
pub const BRIDGE_REQUESTS_SENT_TOTAL: &str = "bridge_requests_sent_total";
/// Forward write retries (counter).
pub const BRIDGE_WRITE_RETRIES_TOTAL: &str = "bridge_write_retries_total";
/// Responses whose id matched no in-flight request (counter).
pub const BRIDGE_UNKNOWN_RESPONSES_TOTAL: &str = "bridge_unknown_responses_total";
/// Inbound objects that failed to decode and were skipped (counter).
pub const BRIDGE_MALFORMED_RESPONSES_TOTAL: &str = "bridge_malformed_responses_total";
/// In-flight correlated requests (gauge).
pub const BRIDGE_IN_FLIGHT_REQUESTS: &str = "bridge_in_flight_requests";
/// Diagnostic requests issued through the facade (counter, labels: method).
pub const RPC_ISSUED_TOTAL: &str = "rpc_issued_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            BRIDGE_CONNECTIONS_TOTAL,
            BRIDGE_DISCONNECTIONS_TOTAL,
            BRIDGE_REQUESTS_SENT_TOTAL,
            BRIDGE_WRITE_RETRIES_TOTAL,
            BRIDGE_UNKNOWN_RESPONSES_TOTAL,
            BRIDGE_MALFORMED_RESPONSES_TOTAL,
            BRIDGE_IN_FLIGHT_REQUESTS,
            RPC_ISSUED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
