//! Frame Decoder
//!
//! Turns one upstream text frame into a [`Tick`]:
//! base64 (standard alphabet, padded) → protobuf `PricingData` → validation.
//!
//! Decode failures are per-frame and never fatal to the connection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use prost::Message;

use super::messages::PricingData;
use crate::domain::market::Tick;

/// Why a frame was discarded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Payload was not a valid `PricingData` message.
    #[error("invalid protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// `id` field absent or empty.
    #[error("frame has no id")]
    MissingId,

    /// `price` field absent, zero or not finite.
    #[error("frame has no usable price: {0}")]
    InvalidPrice(f32),

    /// `time` field absent or not representable.
    #[error("frame has no usable time: {0}")]
    InvalidTime(i64),
}

impl DecodeError {
    /// Short label used for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Base64(_) => "base64",
            Self::Protobuf(_) => "protobuf",
            Self::MissingId => "missing_id",
            Self::InvalidPrice(_) => "invalid_price",
            Self::InvalidTime(_) => "invalid_time",
        }
    }
}

/// Stateless decoder for upstream tick frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Create a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] naming the first check the frame failed.
    pub fn decode(&self, frame: &str) -> Result<Tick, DecodeError> {
        let bytes = STANDARD.decode(frame.trim())?;
        let data = PricingData::decode(bytes.as_slice())?;
        Self::validate(data)
    }

    fn validate(data: PricingData) -> Result<Tick, DecodeError> {
        if data.id.is_empty() {
            return Err(DecodeError::MissingId);
        }
        // proto3 has no presence for scalars; zero means the field was not sent.
        if data.price == 0.0 || !data.price.is_finite() {
            return Err(DecodeError::InvalidPrice(data.price));
        }
        if data.time == 0 {
            return Err(DecodeError::InvalidTime(data.time));
        }
        let timestamp =
            DateTime::from_timestamp_millis(data.time).ok_or(DecodeError::InvalidTime(data.time))?;

        Ok(Tick::new(data.id, f64::from(data.price), timestamp))
    }
}
