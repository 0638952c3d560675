//! Prometheus metrics
//!
//! Pipeline crates record through the `metrics` facade; this module installs
//! the exporter and owns the session-level series.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle, crate::ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| crate::ServerError::Internal(format!("metrics recorder: {}", e)))?;

    metrics::describe_counter!("voice_bridge_sessions_total", "Sessions started");
    metrics::describe_counter!(
        "voice_bridge_handshake_failures_total",
        "Connections closed before a stream id was found"
    );
    metrics::describe_counter!("voice_bridge_stage_errors_total", "Session-fatal stage failures");
    metrics::describe_counter!("voice_bridge_turns_total", "User turns sealed, by end reason");
    metrics::describe_counter!("voice_bridge_interruptions_total", "Responses cut off by barge-in");
    metrics::describe_gauge!("voice_bridge_active_sessions", "Sessions currently registered");

    Ok(handle)
}

pub fn record_session_started() {
    metrics::counter!("voice_bridge_sessions_total").increment(1);
}

pub fn record_handshake_failure() {
    metrics::counter!("voice_bridge_handshake_failures_total").increment(1);
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("voice_bridge_active_sessions").set(count as f64);
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
