//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, the upstream feed client and the
//! downstream HTTP/WebSocket server.

/// API key gate backed by the configured key list.
pub mod access;

/// Per-instrument broadcast channels for pooled live streaming.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Bounded single-consumer tick queue with backpressure accounting.
pub mod fanout;

/// HTTP polling, WebSocket streaming and operational endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Connector lifecycle management.
pub mod supervisor;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// Upstream price feed WebSocket client.
pub mod upstream;
