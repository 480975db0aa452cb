//! HTTP and WebSocket Server
//!
//! Downstream interface of the relay plus the operational endpoints used by
//! container orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /prices?pair=..&timeframe=..` - latest price or OHLC snapshot
//! - `GET /ws` - live WebSocket stream
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe
//! - `GET /readyz` - readiness probe (at least one monitor streaming)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! `/prices` and `/ws` require an `X-API-Key` header checked by the
//! [`AccessGate`] before any other work happens.

mod error;
mod live;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::ApiError;
pub use routes::{API_KEY_HEADER, HealthResponse, HealthStatus};

use crate::application::ports::AccessGate;
use crate::application::services::PriceQuery;
use crate::infrastructure::supervisor::Supervisor;

// =============================================================================
// State
// =============================================================================

/// Shared state behind every handler.
pub struct AppState {
    version: String,
    started_at: Instant,
    supervisor: Arc<Supervisor>,
    query: PriceQuery,
    gate: Arc<dyn AccessGate>,
    cancel: CancellationToken,
}

impl AppState {
    /// Create handler state. Cancelling `cancel` ends open live streams.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        supervisor: Arc<Supervisor>,
        gate: Arc<dyn AccessGate>,
        cancel: CancellationToken,
    ) -> Self {
        let query = PriceQuery::new(
            Arc::clone(supervisor.registry()),
            Arc::clone(supervisor.store()),
        );
        Self {
            version: version.into(),
            started_at: Instant::now(),
            supervisor,
            query,
            gate,
            cancel,
        }
    }
}

/// Build the relay router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/prices", get(routes::prices_handler))
        .route("/ws", get(live::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            routes::require_api_key,
        ));

    Router::new()
        .route("/health", get(routes::health_handler))
        .route("/healthz", get(routes::liveness_handler))
        .route("/readyz", get(routes::readiness_handler))
        .route("/metrics", get(routes::metrics_handler))
        .merge(gated)
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Relay HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::DateTime;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{GateError, MockAccessGate};
    use crate::domain::instrument::{InstrumentCode, InstrumentRegistry};
    use crate::domain::market::Tick;
    use crate::domain::store::TickStore;
    use crate::infrastructure::supervisor::SupervisorConfig;

    fn open_gate() -> MockAccessGate {
        let mut gate = MockAccessGate::new();
        gate.expect_verify().returning(|key| Ok(key == "good"));
        gate.expect_record_call().returning(|_| Ok(()));
        gate
    }

    fn app(gate: MockAccessGate) -> Router {
        let registry = Arc::new(InstrumentRegistry::builtin());
        let store = Arc::new(TickStore::default());
        let code = InstrumentCode::new("EUR/USD");
        for (secs, price) in [(0, 1.1000), (30, 1.1010), (65, 1.0990)] {
            let ts = DateTime::from_timestamp(1_709_287_200 + secs, 0).unwrap();
            store.append(&code, Tick::new("EURUSD=X", price, ts));
        }
        let supervisor = Arc::new(Supervisor::new(
            registry,
            store,
            SupervisorConfig::default(),
            CancellationToken::new(),
        ));
        let state = AppState::new("test", supervisor, Arc::new(gate), CancellationToken::new());
        router(Arc::new(state))
    }

    async fn send(app: Router, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(key) = key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn prices_tick_returns_latest() {
        let (status, body) = send(app(open_gate()), "/prices?pair=EUR/USD", Some("good")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pair"], "EUR/USD");
        assert_eq!(body["timeframe"], "tick");
        assert_eq!(body["prices"], serde_json::json!([1.099]));
    }

    #[tokio::test]
    async fn prices_ohlc_uses_oldest_bucket() {
        let (status, body) = send(
            app(open_gate()),
            "/prices?pair=EUR/USD&timeframe=1m",
            Some("good"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prices"], serde_json::json!([1.1, 1.101, 1.1, 1.101]));
    }

    #[tokio::test]
    async fn prices_status_codes() {
        let cases = [
            ("/prices", StatusCode::BAD_REQUEST),
            ("/prices?pair=XYZ/ABC", StatusCode::NOT_FOUND),
            ("/prices?pair=EUR/USD&timeframe=xyz", StatusCode::NOT_FOUND),
            ("/prices?pair=GBP/USD", StatusCode::NOT_FOUND),
        ];
        for (uri, expected) in cases {
            let (status, body) = send(app(open_gate()), uri, Some("good")).await;
            assert_eq!(status, expected, "{uri}");
            assert!(body["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn gated_routes_require_a_key() {
        let (status, _) = send(app(open_gate()), "/prices?pair=EUR/USD", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(app(open_gate()), "/prices?pair=EUR/USD", Some("bad")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(app(open_gate()), "/ws", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn gate_runs_before_validation() {
        let mut gate = MockAccessGate::new();
        gate.expect_verify()
            .returning(|_| Err(GateError::Backend("unreachable".into())));
        gate.expect_record_call().never();

        let (status, _) = send(app(gate), "/prices", Some("good")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn quota_exhaustion_is_429() {
        let mut gate = MockAccessGate::new();
        gate.expect_verify().returning(|_| Ok(true));
        gate.expect_record_call()
            .returning(|_| Err(GateError::QuotaExceeded { limit: 1 }));

        let (status, _) = send(app(gate), "/prices?pair=EUR/USD", Some("good")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn operational_routes_skip_the_gate() {
        let mut gate = MockAccessGate::new();
        gate.expect_verify().never();
        gate.expect_record_call().never();
        let app = app(gate);

        let (status, _) = send(app.clone(), "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app.clone(), "/readyz", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, body) = send(app, "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["store"]["retained_ticks"], 3);
    }
}
