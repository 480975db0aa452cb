//! Market Data Types
//!
//! Ticks, OHLC aggregates, timeframes and the rolling candle builder.
//! These are the canonical internal representation regardless of the
//! upstream wire format.

mod candle;
mod timeframe;

pub use candle::{Candle, CandleBuilder};
pub use timeframe::{ParseTimeframeError, Timeframe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Tick
// =============================================================================

/// A single timestamped price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    id: String,
    price: f64,
    timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create a tick.
    #[must_use]
    pub fn new(id: impl Into<String>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            price,
            timestamp,
        }
    }

    /// Upstream identifier the tick was published under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Observed price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Observation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// =============================================================================
// OHLC
// =============================================================================

/// Open/high/low/close over one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    /// First price in the bucket.
    pub open: f64,
    /// Highest price in the bucket.
    pub high: f64,
    /// Lowest price in the bucket.
    pub low: f64,
    /// Last price in the bucket.
    pub close: f64,
}

impl Ohlc {
    /// Start a window at a single price.
    #[must_use]
    pub const fn from_price(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold a later price into the window.
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// `[open, high, low, close]`.
    #[must_use]
    pub const fn to_array(&self) -> [f64; 4] {
        [self.open, self.high, self.low, self.close]
    }
}
