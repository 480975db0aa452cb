//! Connector state machine states.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of one upstream connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected; initial and terminal state.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open and subscribe message sent.
    Subscribed,
    /// At least one frame read on this connection.
    Streaming,
    /// Transport failed; waiting to reconnect.
    Degraded,
}

impl ConnectionState {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
