//! Configuration Module
//!
//! Environment-driven configuration for the relay and the conversions into
//! the supervisor, store and registry settings it wires together.

mod settings;

pub use settings::{
    AccessSettings, ApiKeys, ConfigError, DEFAULT_HTTP_PORT, LogFormat, ReconnectStrategy,
    RelayConfig, StreamingSettings, UpstreamSettings,
};
