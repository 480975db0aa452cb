//! Upstream Feed Adapter
//!
//! WebSocket client for the upstream price streamer:
//!
//! - **messages**: protobuf `PricingData` frame and JSON subscribe request
//! - **codec**: base64 + protobuf frame decoding into ticks
//! - **reconnect**: delay schedule between reconnect attempts
//! - **connector**: connection state machine and read loop

pub mod codec;
pub mod connector;
pub mod messages;
pub mod reconnect;
mod state;

pub use codec::{DecodeError, FrameDecoder};
pub use connector::{
    ConnectorConfig, ConnectorError, ConnectorStats, DEFAULT_UPSTREAM_URL, UpstreamConnector,
};
pub use messages::{PricingData, SubscribeRequest};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::ConnectionState;
