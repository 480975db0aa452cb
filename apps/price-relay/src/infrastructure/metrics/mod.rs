//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingest**: frames received, decode failures, ticks stored, tick age
//! - **Connections**: reconnects, connectors by state, live clients
//! - **Backpressure**: fan-out stalls
//! - **Requests**: downstream requests rejected before any relay work
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use super::upstream::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle, if metrics were initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "relay_frames_received_total",
        "Text frames read from the upstream feed"
    );
    describe_counter!(
        "relay_decode_failures_total",
        "Upstream frames discarded because they failed to decode"
    );
    describe_counter!(
        "relay_ticks_stored_total",
        "Ticks appended to the tick store"
    );
    describe_histogram!(
        "relay_tick_age_seconds",
        "Delay between a tick's timestamp and its arrival at the store"
    );

    describe_counter!(
        "relay_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_gauge!(
        "relay_connectors",
        "Upstream connectors by connection state"
    );
    describe_gauge!("relay_live_clients", "Connected live stream clients");

    describe_counter!(
        "relay_fanout_stalls_total",
        "Times a connector found its fan-out queue full and had to wait"
    );

    describe_counter!(
        "relay_requests_rejected_total",
        "Downstream requests rejected before relay work began"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Which path a connector serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorRole {
    /// Long-lived connector feeding the tick store.
    Monitor,
    /// Connector dedicated to one live client.
    Live,
}

impl ConnectorRole {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Live => "live",
        }
    }
}

/// Record a frame read from upstream.
pub fn record_frame_received(role: ConnectorRole) {
    counter!("relay_frames_received_total", "role" => role.as_str()).increment(1);
}

/// Record a discarded frame.
pub fn record_decode_failure(reason: &'static str) {
    counter!("relay_decode_failures_total", "reason" => reason).increment(1);
}

/// Record a tick appended to the store and its age on arrival.
pub fn record_tick_stored(age: Duration) {
    counter!("relay_ticks_stored_total").increment(1);
    histogram!("relay_tick_age_seconds").record(age.as_secs_f64());
}

/// Record a reconnection attempt.
pub fn record_reconnect(role: ConnectorRole) {
    counter!("relay_reconnects_total", "role" => role.as_str()).increment(1);
}

/// Move one connector between state gauges.
pub fn record_state_transition(from: ConnectionState, to: ConnectionState) {
    if from == to {
        return;
    }
    gauge!("relay_connectors", "state" => from.as_str()).decrement(1.0);
    gauge!("relay_connectors", "state" => to.as_str()).increment(1.0);
}

/// Count a freshly created connector.
pub fn record_connector_created() {
    gauge!("relay_connectors", "state" => ConnectionState::Disconnected.as_str()).increment(1.0);
}

/// Remove a finished connector from the state gauges.
pub fn record_connector_dropped(last: ConnectionState) {
    gauge!("relay_connectors", "state" => last.as_str()).decrement(1.0);
}

/// Record a full fan-out queue.
pub fn record_fanout_stall() {
    counter!("relay_fanout_stalls_total").increment(1);
}

/// Update the live client count.
pub fn adjust_live_clients(delta: f64) {
    gauge!("relay_live_clients").increment(delta);
}

/// Record a rejected downstream request.
pub fn record_request_rejected(route: &'static str, reason: &'static str) {
    counter!(
        "relay_requests_rejected_total",
        "route" => route,
        "reason" => reason
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_role_as_str() {
        assert_eq!(ConnectorRole::Monitor.as_str(), "monitor");
        assert_eq!(ConnectorRole::Live.as_str(), "live");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_frame_received(ConnectorRole::Live);
        record_decode_failure("base64");
        record_state_transition(ConnectionState::Connecting, ConnectionState::Subscribed);
        record_request_rejected("prices", "unauthorized");
    }
}
