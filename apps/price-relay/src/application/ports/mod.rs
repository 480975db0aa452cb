//! Port Interfaces
//!
//! Contracts the relay core expects from external collaborators.
//!
//! ## Driven Ports (Outbound)
//!
//! - `AccessGate`: API key verification and per-caller usage accounting

use async_trait::async_trait;

/// Failure reported by an access collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The caller used up its call allowance.
    #[error("call limit of {limit} reached")]
    QuotaExceeded {
        /// Configured ceiling.
        limit: u64,
    },

    /// The backing account/usage store failed.
    #[error("access backend failure: {0}")]
    Backend(String),
}

/// API key verification and usage recording.
///
/// Both calls run before any relay work for a request begins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Whether the key belongs to a known caller.
    async fn verify(&self, api_key: &str) -> Result<bool, GateError>;

    /// Record one call against the key.
    async fn record_call(&self, api_key: &str) -> Result<(), GateError>;
}
