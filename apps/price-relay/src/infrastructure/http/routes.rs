//! Polling, access gate and operational handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::application::ports::AccessGate;
use crate::application::services::PriceSnapshot;
use crate::domain::store::StoreStats;
use crate::infrastructure::broadcast::HubStats;
use crate::infrastructure::metrics::{self, get_metrics_handle};
use crate::infrastructure::supervisor::{MonitorStatus, StreamingMode};
use crate::infrastructure::upstream::ConnectionState;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

// =============================================================================
// Access gate
// =============================================================================

/// Verify the key and record the call before any relay work.
pub(super) async fn authorize(gate: &dyn AccessGate, headers: &HeaderMap) -> Result<(), ApiError> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(ApiError::MissingApiKey)?;

    if !gate.verify(key).await? {
        return Err(ApiError::InvalidApiKey);
    }
    gate.record_call(key).await?;
    Ok(())
}

pub(super) fn route_label(path: &str) -> &'static str {
    match path {
        "/prices" => "prices",
        "/ws" => "ws",
        _ => "other",
    }
}

pub(super) async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let route = route_label(request.uri().path());
    if let Err(e) = authorize(state.gate.as_ref(), request.headers()).await {
        tracing::debug!(route, reason = e.reason(), "request rejected by access gate");
        metrics::record_request_rejected(route, e.reason());
        return Err(e);
    }
    Ok(next.run(request).await)
}

// =============================================================================
// Polling
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct PriceParams {
    pair: Option<String>,
    timeframe: Option<String>,
}

pub(super) async fn prices_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PriceParams>,
) -> Result<Json<PriceSnapshot>, ApiError> {
    state
        .query
        .snapshot(params.pair.as_deref(), params.timeframe.as_deref())
        .map(Json)
        .map_err(|e| {
            let e = ApiError::from(e);
            metrics::record_request_rejected("prices", e.reason());
            e
        })
}

// =============================================================================
// Health
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Live client feeding strategy.
    pub mode: StreamingMode,
    /// Connected live clients.
    pub live_clients: usize,
    /// Per-instrument monitor state.
    pub monitors: Vec<MonitorStatus>,
    /// Tick store counters.
    pub store: StoreStats,
    /// Tick hub receiver counts.
    pub hub: HubStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every monitor is streaming.
    Healthy,
    /// Some monitors are streaming.
    Degraded,
    /// No monitor is streaming.
    Unhealthy,
}

pub(super) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.supervisor.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let supervisor = &state.supervisor;
    let monitors = supervisor.monitor_states();
    let states: Vec<ConnectionState> = monitors.iter().map(|m| m.state).collect();

    HealthResponse {
        status: determine_health_status(&states),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        mode: supervisor.mode(),
        live_clients: supervisor.live_clients(),
        monitors,
        store: supervisor.store().stats(),
        hub: supervisor.hub_stats(),
    }
}

fn determine_health_status(states: &[ConnectionState]) -> HealthStatus {
    let streaming = states
        .iter()
        .filter(|&&s| s == ConnectionState::Streaming)
        .count();

    match streaming {
        0 => HealthStatus::Unhealthy,
        n if n == states.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}
