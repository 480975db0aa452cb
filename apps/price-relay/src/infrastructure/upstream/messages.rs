//! Upstream Wire Messages
//!
//! The streaming feed pushes base64-encoded protobuf `PricingData` frames and
//! accepts a JSON subscribe control message.
//!
//! Only `id`, `price` and `time` feed the relay; the remaining fields are
//! decoded so that their presence never breaks parsing.

use serde::Serialize;

/// One price update from the upstream feed.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PricingData {
    /// Upstream symbol.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Last price.
    #[prost(float, tag = "2")]
    pub price: f32,
    /// Epoch milliseconds.
    #[prost(sint64, tag = "3")]
    pub time: i64,
    /// Quote currency.
    #[prost(string, tag = "4")]
    pub currency: String,
    /// Exchange code.
    #[prost(string, tag = "5")]
    pub exchange: String,
    /// Quote type enum value.
    #[prost(int32, tag = "6")]
    pub quote_type: i32,
    /// Market hours enum value.
    #[prost(int32, tag = "7")]
    pub market_hours: i32,
    /// Percent change on the day.
    #[prost(float, tag = "8")]
    pub change_percent: f32,
    /// Volume on the day.
    #[prost(sint64, tag = "9")]
    pub day_volume: i64,
    /// High of the day.
    #[prost(float, tag = "10")]
    pub day_high: f32,
    /// Low of the day.
    #[prost(float, tag = "11")]
    pub day_low: f32,
    /// Absolute change on the day.
    #[prost(float, tag = "12")]
    pub change: f32,
    /// Display name.
    #[prost(string, tag = "13")]
    pub short_name: String,
    /// Open of the day.
    #[prost(float, tag = "15")]
    pub open_price: f32,
    /// Previous close.
    #[prost(float, tag = "16")]
    pub previous_close: f32,
    /// Size of the last trade.
    #[prost(sint64, tag = "22")]
    pub last_size: i64,
    /// Best bid.
    #[prost(float, tag = "23")]
    pub bid: f32,
    /// Size at the best bid.
    #[prost(sint64, tag = "24")]
    pub bid_size: i64,
    /// Best ask.
    #[prost(float, tag = "25")]
    pub ask: f32,
    /// Size at the best ask.
    #[prost(sint64, tag = "26")]
    pub ask_size: i64,
}

/// `{"subscribe": [...]}` control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Upstream symbols to subscribe to.
    pub subscribe: Vec<String>,
}

impl SubscribeRequest {
    /// Build a subscribe request.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscribe: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Serialize to the JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
