//! Tick Hub
//!
//! One tokio broadcast channel per tracked instrument. In pooled streaming
//! mode the monitoring connector's store writer publishes every tick here
//! and each live client holds a receiver, so one upstream connection serves
//! any number of clients.
//!
//! A receiver that falls more than the channel capacity behind loses the
//! oldest ticks (`RecvError::Lagged`) instead of stalling the writer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::instrument::InstrumentCode;
use crate::domain::market::Tick;

/// Per-channel capacity used when none is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Shared hub handle.
pub type SharedTickHub = Arc<TickHub>;

/// Receiver counts across the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Instruments with a channel.
    pub channels: usize,
    /// Receivers across all channels.
    pub receivers: usize,
}

/// Per-instrument broadcast channels.
///
/// # Example
///
/// ```rust
/// use price_relay::domain::instrument::InstrumentCode;
/// use price_relay::infrastructure::broadcast::TickHub;
///
/// let hub = TickHub::new([InstrumentCode::new("EUR/USD")], 16);
/// let rx = hub.subscribe(&InstrumentCode::new("EUR/USD"));
/// assert!(rx.is_some());
/// assert!(hub.subscribe(&InstrumentCode::new("XYZ/ABC")).is_none());
/// ```
#[derive(Debug)]
pub struct TickHub {
    channels: HashMap<InstrumentCode, broadcast::Sender<Tick>>,
}

impl TickHub {
    /// Create one channel per instrument.
    #[must_use]
    pub fn new(instruments: impl IntoIterator<Item = InstrumentCode>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let channels = instruments
            .into_iter()
            .map(|code| (code, broadcast::channel(capacity).0))
            .collect();
        Self { channels }
    }

    /// Publish a tick to the instrument's receivers.
    ///
    /// Returns the number of receivers reached, or `None` if there were none
    /// or the instrument has no channel.
    pub fn publish(&self, instrument: &InstrumentCode, tick: Tick) -> Option<usize> {
        self.channels.get(instrument)?.send(tick).ok()
    }

    /// New receiver for the instrument.
    #[must_use]
    pub fn subscribe(&self, instrument: &InstrumentCode) -> Option<broadcast::Receiver<Tick>> {
        self.channels.get(instrument).map(broadcast::Sender::subscribe)
    }

    /// Receivers attached to the instrument's channel.
    #[must_use]
    pub fn receiver_count(&self, instrument: &InstrumentCode) -> usize {
        self.channels
            .get(instrument)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Receiver counts across the hub.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            channels: self.channels.len(),
            receivers: self
                .channels
                .values()
                .map(broadcast::Sender::receiver_count)
                .sum(),
        }
    }
}
