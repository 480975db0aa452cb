//! Instrument Registry
//!
//! Maps logical pair identifiers (`EUR/USD`) to the upstream feed's own
//! subscription codes (`EURUSD=X`). The registry is built once at startup
//! and never mutated afterwards; components share it behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Logical pair identifier as exposed to downstream clients.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentCode(String);

impl InstrumentCode {
    /// Create an instrument code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Subscription code understood by the upstream streaming feed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpstreamSymbol(String);

impl UpstreamSymbol {
    /// Create an upstream symbol.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// The symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpstreamSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UpstreamSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Built-in Pairs
// =============================================================================

const BUILTIN_PAIRS: &[(&str, &str)] = &[
    ("EUR/USD", "EURUSD=X"),
    ("USD/JPY", "JPY=X"),
    ("GBP/USD", "GBPUSD=X"),
    ("AUD/USD", "AUDUSD=X"),
    ("NZD/USD", "NZDUSD=X"),
    ("EUR/JPY", "EURJPY=X"),
    ("GBP/JPY", "GBPJPY=X"),
    ("EUR/GBP", "EURGBP=X"),
    ("EUR/CAD", "EURCAD=X"),
    ("EUR/SEK", "EURSEK=X"),
    ("EUR/CHF", "EURCHF=X"),
    ("EUR/HUF", "EURHUF=X"),
    ("USD/CNY", "CNY=X"),
    ("USD/HKD", "HKD=X"),
    ("USD/SGD", "SGD=X"),
    ("USD/INR", "INR=X"),
    ("USD/MXN", "MXN=X"),
    ("USD/PHP", "PHP=X"),
    ("USD/IDR", "IDR=X"),
    ("USD/THB", "THB=X"),
    ("USD/MYR", "MYR=X"),
    ("USD/ZAR", "ZAR=X"),
    ("USD/RUB", "RUB=X"),
    ("BTC/USD", "BTC-USD"),
    ("ETH/USD", "ETH-USD"),
    ("USDT/USD", "USDT-USD"),
    ("BNB/USD", "BNB-USD"),
    ("SOL/USD", "SOL-USD"),
    ("USDC/USD", "USDC-USD"),
    ("XRP/USD", "XRP-USD"),
    ("STETH/USD", "STETH-USD"),
    ("DOGE/USD", "DOGE-USD"),
    ("TON11419/USD", "TON11419-USD"),
    ("ADA/USD", "ADA-USD"),
    ("WTRX/USD", "WTRX-USD"),
    ("TRX/USD", "TRX-USD"),
    ("WSTETH/USD", "WSTETH-USD"),
    ("AVAX/USD", "AVAX-USD"),
    ("WBTC/USD", "WBTC-USD"),
    ("WETH/USD", "WETH-USD"),
    ("SHIB/USD", "SHIB-USD"),
    ("LINK/USD", "LINK-USD"),
    ("DOT/USD", "DOT-USD"),
    ("BCH/USD", "BCH-USD"),
    ("EDLC/USD", "EDLC-USD"),
    ("MATIC/USD", "MATIC-USD"),
    ("NEAR/USD", "NEAR-USD"),
    ("LEO/USD", "LEO-USD"),
];

// =============================================================================
// Registry
// =============================================================================

/// Immutable `InstrumentCode` → `UpstreamSymbol` mapping.
///
/// # Example
///
/// ```rust
/// use price_relay::domain::instrument::{InstrumentCode, InstrumentRegistry};
///
/// let registry = InstrumentRegistry::builtin();
/// let symbol = registry.resolve(&InstrumentCode::new("EUR/USD")).unwrap();
/// assert_eq!(symbol.as_str(), "EURUSD=X");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    entries: BTreeMap<InstrumentCode, UpstreamSymbol>,
}

impl InstrumentRegistry {
    /// Registry of every pair the relay tracks in production.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_pairs(BUILTIN_PAIRS.iter().copied())
    }

    /// Build a registry from explicit `(code, symbol)` pairs.
    ///
    /// A repeated code keeps its last symbol.
    #[must_use]
    pub fn from_pairs<C, S>(pairs: impl IntoIterator<Item = (C, S)>) -> Self
    where
        C: Into<String>,
        S: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(code, symbol)| (InstrumentCode::new(code), UpstreamSymbol::new(symbol)))
            .collect();
        Self { entries }
    }

    /// Look up the upstream symbol for a code.
    #[must_use]
    pub fn resolve(&self, code: &InstrumentCode) -> Option<&UpstreamSymbol> {
        self.entries.get(code)
    }

    /// Look up a code given as a raw string.
    #[must_use]
    pub fn lookup(&self, code: &str) -> Option<(&InstrumentCode, &UpstreamSymbol)> {
        self.entries.get_key_value(&InstrumentCode::new(code))
    }

    /// Whether the code is registered.
    #[must_use]
    pub fn contains(&self, code: &InstrumentCode) -> bool {
        self.entries.contains_key(code)
    }

    /// Iterate over all registered pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&InstrumentCode, &UpstreamSymbol)> {
        self.entries.iter()
    }

    /// Number of registered instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
