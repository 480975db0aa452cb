//! Rolling OHLC over a live tick stream.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Ohlc, Tick, Timeframe};

/// OHLC window for one aligned bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    /// Start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// Aggregate so far.
    #[serde(flatten)]
    pub ohlc: Ohlc,
}

/// Folds ticks into the candle of their bucket.
///
/// A tick whose bucket differs from the current one opens a fresh candle,
/// whether it is later or earlier in time. Only the open candle is kept.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    timeframe: Timeframe,
    current: Option<Candle>,
}

impl CandleBuilder {
    /// Create a builder for `timeframe`.
    #[must_use]
    pub const fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
        }
    }

    /// Timeframe this builder aggregates over.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Fold a tick in and return the recomputed candle.
    pub fn push(&mut self, tick: &Tick) -> Candle {
        let bucket_start = self.timeframe.align(&tick.timestamp());
        let candle = match self.current {
            Some(mut candle) if candle.bucket_start == bucket_start => {
                candle.ohlc.update(tick.price());
                candle
            }
            _ => Candle {
                bucket_start,
                ohlc: Ohlc::from_price(tick.price()),
            },
        };
        self.current = Some(candle);
        candle
    }

    /// The candle currently being built.
    #[must_use]
    pub const fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }
}
