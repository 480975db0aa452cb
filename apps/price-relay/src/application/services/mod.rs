//! Application Services
//!
//! - `PriceQuery`: latest price / OHLC snapshots from the tick store
//! - `StreamRequest`: validation of a live stream's opening message
//! - `LiveAggregator`: shapes live ticks into outbound stream messages

mod query;
mod stream;

pub use query::{PriceQuery, PriceSnapshot, QueryError};
pub use stream::{LiveAggregator, StreamMessage, StreamRequest};

/// A request named something the relay does not know.
///
/// Fatal to the single request or connection only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No instrument was given.
    #[error("pair is required")]
    MissingPair,

    /// Instrument code not in the registry.
    #[error("unknown pair: {0}")]
    UnknownInstrument(String),

    /// Known instrument without a monitor to share ticks from.
    #[error("pair not monitored: {0}")]
    NotMonitored(String),

    /// Timeframe string not recognized.
    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    /// Opening message could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),
}
