//! Live stream request validation and message shaping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ValidationError;
use crate::domain::instrument::{InstrumentCode, InstrumentRegistry, UpstreamSymbol};
use crate::domain::market::{CandleBuilder, Tick, Timeframe};

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawStreamRequest {
    pair: Option<String>,
    timeframe: Option<String>,
}

/// Validated opening message of a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Requested instrument.
    pub instrument: InstrumentCode,
    /// Upstream symbol to subscribe to.
    pub symbol: UpstreamSymbol,
    /// Requested timeframe.
    pub timeframe: Timeframe,
}

impl StreamRequest {
    /// Parse a client's first text frame.
    ///
    /// Accepts a bare instrument code (`EUR/USD`), the same code as a JSON
    /// string (`"EUR/USD"`), or a JSON object
    /// `{"pair": "...", "timeframe": "..."}` whose timeframe defaults to
    /// `tick`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for malformed JSON, a missing or unknown
    /// pair, or an unknown timeframe.
    pub fn parse(text: &str, registry: &InstrumentRegistry) -> Result<Self, ValidationError> {
        let text = text.trim();
        let (pair, timeframe) = if text.starts_with('{') {
            let raw: RawStreamRequest = serde_json::from_str(text)
                .map_err(|e| ValidationError::Malformed(e.to_string()))?;
            (raw.pair.unwrap_or_default(), raw.timeframe)
        } else if text.starts_with('"') {
            let pair: String = serde_json::from_str(text)
                .map_err(|e| ValidationError::Malformed(e.to_string()))?;
            (pair, None)
        } else {
            (text.to_string(), None)
        };

        let pair = pair.trim();
        if pair.is_empty() {
            return Err(ValidationError::MissingPair);
        }

        let timeframe = match timeframe.as_deref().map(str::trim) {
            None | Some("") => Timeframe::Tick,
            Some(raw) => raw
                .parse()
                .map_err(|_| ValidationError::UnknownTimeframe(raw.to_string()))?,
        };

        let (instrument, symbol) = registry
            .lookup(pair)
            .ok_or_else(|| ValidationError::UnknownInstrument(pair.to_string()))?;

        Ok(Self {
            instrument: instrument.clone(),
            symbol: symbol.clone(),
            timeframe,
        })
    }
}

// =============================================================================
// Outbound messages
// =============================================================================

/// One outbound live stream message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamMessage {
    /// Raw tick passthrough.
    Tick {
        /// Instrument code.
        pair: InstrumentCode,
        /// Observed price.
        price: f64,
        /// Observation time.
        timestamp: DateTime<Utc>,
    },
    /// Recomputed candle of the current bucket.
    Candle {
        /// Instrument code.
        pair: InstrumentCode,
        /// Aggregation timeframe.
        timeframe: Timeframe,
        /// Start of the bucket.
        bucket_start: DateTime<Utc>,
        /// First price in the bucket.
        open: f64,
        /// Highest price in the bucket.
        high: f64,
        /// Lowest price in the bucket.
        low: f64,
        /// Latest price in the bucket.
        close: f64,
    },
}

/// Turns live ticks into [`StreamMessage`]s for one client.
#[derive(Debug, Clone)]
pub struct LiveAggregator {
    instrument: InstrumentCode,
    candles: Option<CandleBuilder>,
}

impl LiveAggregator {
    /// Aggregator for a validated request.
    #[must_use]
    pub fn new(request: &StreamRequest) -> Self {
        let candles = (!request.timeframe.is_tick()).then(|| CandleBuilder::new(request.timeframe));
        Self {
            instrument: request.instrument.clone(),
            candles,
        }
    }

    /// Message to send for `tick`.
    pub fn on_tick(&mut self, tick: &Tick) -> StreamMessage {
        match &mut self.candles {
            None => StreamMessage::Tick {
                pair: self.instrument.clone(),
                price: tick.price(),
                timestamp: tick.timestamp(),
            },
            Some(builder) => {
                let candle = builder.push(tick);
                StreamMessage::Candle {
                    pair: self.instrument.clone(),
                    timeframe: builder.timeframe(),
                    bucket_start: candle.bucket_start,
                    open: candle.ohlc.open,
                    high: candle.ohlc.high,
                    low: candle.ohlc.low,
                    close: candle.ohlc.close,
                }
            }
        }
    }
}
