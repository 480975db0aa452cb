//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::application::ports::GateError;
use crate::application::services::{QueryError, ValidationError};

/// Failure of a downstream request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No `X-API-Key` header.
    #[error("missing API key")]
    MissingApiKey,

    /// Key not accepted by the access gate.
    #[error("invalid API key")]
    InvalidApiKey,

    /// Caller reached its call ceiling.
    #[error("call limit of {limit} reached")]
    QuotaExceeded {
        /// Configured ceiling.
        limit: u64,
    },

    /// Access collaborator failed.
    #[error("access check failed: {0}")]
    Gate(String),

    /// Request named something unknown or was malformed.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Nothing stored yet for the instrument.
    #[error("no data for {0}")]
    NoData(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Gate(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Invalid(ValidationError::MissingPair | ValidationError::Malformed(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Invalid(
                ValidationError::UnknownInstrument(_)
                | ValidationError::NotMonitored(_)
                | ValidationError::UnknownTimeframe(_),
            )
            | Self::NoData(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Metric label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey => "invalid_api_key",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Gate(_) => "gate_failure",
            Self::Invalid(ValidationError::MissingPair) => "missing_pair",
            Self::Invalid(ValidationError::UnknownInstrument(_)) => "unknown_instrument",
            Self::Invalid(ValidationError::NotMonitored(_)) => "not_monitored",
            Self::Invalid(ValidationError::UnknownTimeframe(_)) => "unknown_timeframe",
            Self::Invalid(ValidationError::Malformed(_)) => "malformed",
            Self::NoData(_) => "no_data",
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::QuotaExceeded { limit } => Self::QuotaExceeded { limit },
            GateError::Backend(message) => Self::Gate(message),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Invalid(invalid) => Self::Invalid(invalid),
            QueryError::NoData { pair } => Self::NoData(pair.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Gate(message) = &self {
            tracing::error!(error = %message, "access gate failure");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(ApiError::MissingApiKey, StatusCode::UNAUTHORIZED ; "missing key")]
    #[test_case(ApiError::InvalidApiKey, StatusCode::UNAUTHORIZED ; "invalid key")]
    #[test_case(ApiError::QuotaExceeded { limit: 3 }, StatusCode::TOO_MANY_REQUESTS ; "quota")]
    #[test_case(ApiError::Gate("down".into()), StatusCode::INTERNAL_SERVER_ERROR ; "gate failure")]
    #[test_case(ApiError::Invalid(ValidationError::MissingPair), StatusCode::BAD_REQUEST ; "missing pair")]
    #[test_case(ApiError::Invalid(ValidationError::UnknownInstrument("X".into())), StatusCode::NOT_FOUND ; "unknown pair")]
    #[test_case(ApiError::Invalid(ValidationError::UnknownTimeframe("xyz".into())), StatusCode::NOT_FOUND ; "unknown timeframe")]
    #[test_case(ApiError::Invalid(ValidationError::NotMonitored("BTC/USD".into())), StatusCode::NOT_FOUND ; "not monitored")]
    #[test_case(ApiError::NoData("EUR/USD".into()), StatusCode::NOT_FOUND ; "no data")]
    fn status_mapping(err: ApiError, expected: StatusCode) {
        assert_eq!(err.status(), expected);
        assert_eq!(err.into_response().status(), expected);
    }

    #[test]
    fn gate_errors_convert() {
        assert_eq!(
            ApiError::from(GateError::QuotaExceeded { limit: 9 }),
            ApiError::QuotaExceeded { limit: 9 }
        );
        assert_eq!(
            ApiError::from(GateError::Backend("timeout".into())),
            ApiError::Gate("timeout".into())
        );
    }
}
