//! Polling price queries.

use std::sync::Arc;

use serde::Serialize;

use super::ValidationError;
use crate::domain::instrument::{InstrumentCode, InstrumentRegistry};
use crate::domain::market::Timeframe;
use crate::domain::store::{BucketAnchor, TickStore};

/// Answer to a polling request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    /// Instrument the prices belong to.
    pub pair: InstrumentCode,
    /// Timeframe that was applied.
    pub timeframe: Timeframe,
    /// `[last]` for `tick`, otherwise `[open, high, low, close]`.
    pub prices: Vec<f64>,
}

/// Why a query produced no snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The request itself was invalid.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Known instrument, but nothing stored yet.
    #[error("no data for {pair}")]
    NoData {
        /// Instrument that was queried.
        pair: InstrumentCode,
    },
}

/// Reads snapshots out of the tick store.
#[derive(Debug, Clone)]
pub struct PriceQuery {
    registry: Arc<InstrumentRegistry>,
    store: Arc<TickStore>,
    anchor: BucketAnchor,
}

impl PriceQuery {
    /// Create a query service over a registry and store.
    #[must_use]
    pub const fn new(registry: Arc<InstrumentRegistry>, store: Arc<TickStore>) -> Self {
        Self {
            registry,
            store,
            anchor: BucketAnchor::Oldest,
        }
    }

    /// Use a different OHLC anchor.
    #[must_use]
    pub fn with_anchor(mut self, anchor: BucketAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Snapshot for `pair` at `timeframe` (default `tick`).
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Invalid`] for a missing or unknown pair or an
    /// unknown timeframe, and [`QueryError::NoData`] when nothing is stored.
    pub fn snapshot(
        &self,
        pair: Option<&str>,
        timeframe: Option<&str>,
    ) -> Result<PriceSnapshot, QueryError> {
        let pair = pair
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError::MissingPair)?;
        let (code, _) = self
            .registry
            .lookup(pair)
            .ok_or_else(|| ValidationError::UnknownInstrument(pair.to_string()))?;
        let timeframe = match timeframe.map(str::trim).filter(|t| !t.is_empty()) {
            None => Timeframe::Tick,
            Some(raw) => raw
                .parse()
                .map_err(|_| ValidationError::UnknownTimeframe(raw.to_string()))?,
        };

        let prices = if timeframe.is_tick() {
            self.store.latest(code).map(|tick| vec![tick.price()])
        } else {
            self.store
                .ohlc_anchored(code, timeframe, self.anchor)
                .map(|ohlc| ohlc.to_array().to_vec())
        };

        prices
            .map(|prices| PriceSnapshot {
                pair: code.clone(),
                timeframe,
                prices,
            })
            .ok_or_else(|| QueryError::NoData { pair: code.clone() })
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::domain::market::Tick;

    fn service() -> PriceQuery {
        let registry = Arc::new(InstrumentRegistry::builtin());
        let store = Arc::new(TickStore::default());
        let code = InstrumentCode::new("EUR/USD");
        let base = 1_709_287_200;
        for (offset, price) in [(0, 1.1000), (30, 1.1010), (65, 1.0990)] {
            let ts = DateTime::from_timestamp(base + offset, 0).unwrap();
            store.append(&code, Tick::new("EURUSD=X", price, ts));
        }
        PriceQuery::new(registry, store)
    }

    #[test]
    fn tick_snapshot_is_latest_price() {
        let snapshot = service().snapshot(Some("EUR/USD"), None).unwrap();
        assert_eq!(snapshot.timeframe, Timeframe::Tick);
        assert_eq!(snapshot.prices, vec![1.0990]);
    }

    #[test]
    fn ohlc_snapshot_uses_oldest_bucket() {
        let snapshot = service().snapshot(Some("EUR/USD"), Some("m1")).unwrap();
        assert_eq!(snapshot.timeframe, Timeframe::OneMinute);
        assert_eq!(snapshot.prices, vec![1.1000, 1.1010, 1.1000, 1.1010]);
    }

    #[test]
    fn latest_anchor_is_configurable() {
        let snapshot = service()
            .with_anchor(BucketAnchor::Latest)
            .snapshot(Some("EUR/USD"), Some("1m"))
            .unwrap();
        assert_eq!(snapshot.prices, vec![1.0990; 4]);
    }

    #[test]
    fn missing_pair_is_rejected() {
        assert_eq!(
            service().snapshot(None, None),
            Err(QueryError::Invalid(ValidationError::MissingPair))
        );
        assert_eq!(
            service().snapshot(Some("  "), None),
            Err(QueryError::Invalid(ValidationError::MissingPair))
        );
    }

    #[test]
    fn unknown_pair_and_timeframe_are_rejected() {
        assert_eq!(
            service().snapshot(Some("XYZ/ABC"), Some("1m")),
            Err(QueryError::Invalid(ValidationError::UnknownInstrument(
                "XYZ/ABC".into()
            )))
        );
        assert_eq!(
            service().snapshot(Some("EUR/USD"), Some("xyz")),
            Err(QueryError::Invalid(ValidationError::UnknownTimeframe(
                "xyz".into()
            )))
        );
    }

    #[test]
    fn registered_pair_without_ticks_has_no_data() {
        assert_eq!(
            service().snapshot(Some("USD/JPY"), None),
            Err(QueryError::NoData {
                pair: "USD/JPY".into()
            })
        );
    }

    #[test]
    fn snapshot_serializes_canonical_timeframe() {
        let snapshot = service().snapshot(Some("EUR/USD"), Some("m1")).unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["pair"], "EUR/USD");
        assert_eq!(json["timeframe"], "1m");
        assert_eq!(json["prices"].as_array().unwrap().len(), 4);
    }
}
