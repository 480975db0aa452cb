#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Relay - Market Price Streaming and Query Service
//!
//! Maintains WebSocket connections to an upstream price streamer, keeps an
//! in-memory tick history per instrument, and serves it downstream as
//! latest-price / OHLC snapshots over HTTP and as live WebSocket streams.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Instruments, ticks, timeframes and the tick store
//!   - `instrument`: Pair codes and the upstream symbol registry
//!   - `market`: Ticks, OHLC, timeframe alignment, candle building
//!   - `store`: Bounded per-instrument tick history
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Access gate contract
//!   - `services`: Price queries, live stream validation and aggregation
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Frame codec, reconnect policy, connector state machine
//!   - `fanout`: Bounded connector-to-consumer queue
//!   - `broadcast`: Per-instrument tick hub for pooled streaming
//!   - `supervisor`: Monitor and live connector lifecycles
//!   - `http`: `/prices`, `/ws` and operational endpoints
//!   - `access`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                ┌──────────────┐   fan-out   ┌────────────┐
//! upstream WS ──►│   monitor    │────────────►│ TickStore  │◄── GET /prices
//!                │  connector   │             └────────────┘
//!                └──────────────┘──► TickHub ──┐ (pooled)
//!                                              ├──► /ws clients
//! upstream WS ──► dedicated connector ─────────┘ (dedicated)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types and tick history with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{InstrumentCode, InstrumentRegistry, UpstreamSymbol};
pub use domain::market::{Ohlc, Tick, Timeframe};
pub use domain::store::{BucketAnchor, RetentionPolicy, TickStore};

// Application services
pub use application::ports::{AccessGate, GateError};
pub use application::services::{PriceQuery, PriceSnapshot, StreamRequest, ValidationError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Upstream connector (for integration tests)
pub use infrastructure::upstream::{
    ConnectionState, ConnectorConfig, ReconnectConfig, UpstreamConnector,
};

// Supervisor and HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};
pub use infrastructure::supervisor::{StreamingMode, Supervisor, SupervisorConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
