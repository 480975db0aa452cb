//! Application Layer - Use cases and port definitions.
//!
//! Request validation, price queries and live-stream message shaping,
//! plus the ports the core needs from its collaborators.

/// Port interfaces for external collaborators.
pub mod ports;

/// Price query and live stream services.
pub mod services;
