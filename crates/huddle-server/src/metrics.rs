//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket upgrades accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket upgrades refused for a missing or bad credential (counter).
pub const WS_UNAUTHORIZED_TOTAL: &str = "ws_unauthorized_total";
/// WebSocket sessions ended (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Frames that failed to parse as envelopes (counter).
pub const WS_INVALID_FRAMES_TOTAL: &str = "ws_invalid_frames_total";
/// WebSocket session duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Admin membership changes (counter, labels: action).
pub const ADMIN_MEMBERSHIP_CHANGES_TOTAL: &str = "admin_membership_changes_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        for name in [
            WS_CONNECTIONS_TOTAL,
            WS_UNAUTHORIZED_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_INVALID_FRAMES_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            ADMIN_MEMBERSHIP_CHANGES_TOTAL,
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
