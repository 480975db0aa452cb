//! Domain Layer - Instruments, market data and tick history.
//!
//! Pure types and in-memory state with no I/O. Everything here is usable
//! without a runtime.

/// Instrument codes and the static upstream symbol registry.
pub mod instrument;

/// Ticks, OHLC, timeframes and candle building.
pub mod market;

/// Per-instrument tick history.
pub mod store;
