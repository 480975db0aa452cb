//! Tick Store
//!
//! Per-instrument, arrival-ordered tick history behind a single
//! reader/writer lock. Answers latest-price and OHLC queries.
//!
//! # OHLC anchoring
//!
//! [`TickStore::ohlc`] anchors on the oldest retained tick: it aligns that
//! tick's timestamp and folds the contiguous run of ticks sharing the bucket,
//! stopping at the first tick that falls elsewhere. The result is the window
//! of the earliest retained bucket, not the current one. Use
//! [`TickStore::ohlc_anchored`] with [`BucketAnchor::Latest`] for the window
//! around the newest tick.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::instrument::InstrumentCode;
use super::market::{Ohlc, Tick, Timeframe};

// =============================================================================
// Policy
// =============================================================================

/// How much history to keep per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum ticks per instrument. `0` keeps everything.
    pub max_ticks: usize,
}

impl RetentionPolicy {
    /// Default per-instrument ceiling.
    pub const DEFAULT_MAX_TICKS: usize = 100_000;

    /// Keep at most `max_ticks` per instrument.
    #[must_use]
    pub const fn bounded(max_ticks: usize) -> Self {
        Self { max_ticks }
    }

    /// Never evict.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { max_ticks: 0 }
    }

    const fn is_bounded(self) -> bool {
        self.max_ticks > 0
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::bounded(Self::DEFAULT_MAX_TICKS)
    }
}

/// Which end of the history an OHLC window is anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketAnchor {
    /// Bucket of the oldest retained tick, scanning forward.
    #[default]
    Oldest,
    /// Bucket of the newest tick, scanning backward.
    Latest,
}

/// Store-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Instruments with at least one tick.
    pub instruments: usize,
    /// Ticks currently retained across all instruments.
    pub retained_ticks: usize,
    /// Ticks appended since start.
    pub appended_total: u64,
    /// Ticks evicted by retention since start.
    pub evicted_total: u64,
}

// =============================================================================
// Store
// =============================================================================

/// Concurrent per-instrument tick history.
#[derive(Debug, Default)]
pub struct TickStore {
    histories: RwLock<HashMap<InstrumentCode, VecDeque<Tick>>>,
    retention: RetentionPolicy,
    appended: AtomicU64,
    evicted: AtomicU64,
}

impl TickStore {
    /// Create a store with the given retention policy.
    #[must_use]
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            retention,
            appended: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Retention policy in force.
    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Append a tick to the instrument's history.
    ///
    /// Ticks are never reordered or deduplicated. When the history is full
    /// the oldest tick is evicted.
    pub fn append(&self, instrument: &InstrumentCode, tick: Tick) {
        let mut histories = self.histories.write();
        let history = histories.entry(instrument.clone()).or_default();

        history.push_back(tick);
        self.appended.fetch_add(1, Ordering::Relaxed);

        if self.retention.is_bounded() {
            while history.len() > self.retention.max_ticks {
                history.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Most recently appended tick.
    #[must_use]
    pub fn latest(&self, instrument: &InstrumentCode) -> Option<Tick> {
        self.histories
            .read()
            .get(instrument)
            .and_then(VecDeque::back)
            .cloned()
    }

    /// OHLC of the oldest retained bucket.
    #[must_use]
    pub fn ohlc(&self, instrument: &InstrumentCode, timeframe: Timeframe) -> Option<Ohlc> {
        self.ohlc_anchored(instrument, timeframe, BucketAnchor::Oldest)
    }

    /// OHLC of the bucket at the chosen end of the history.
    ///
    /// `Tick` yields the singleton window of the anchor tick.
    #[must_use]
    pub fn ohlc_anchored(
        &self,
        instrument: &InstrumentCode,
        timeframe: Timeframe,
        anchor: BucketAnchor,
    ) -> Option<Ohlc> {
        let histories = self.histories.read();
        let history = histories.get(instrument)?;

        let (start, end) = match anchor {
            BucketAnchor::Oldest => {
                let first = history.front()?;
                if timeframe.is_tick() {
                    (0, 1)
                } else {
                    let bucket = timeframe.align(&first.timestamp());
                    let run = history
                        .iter()
                        .take_while(|t| timeframe.align(&t.timestamp()) == bucket)
                        .count();
                    (0, run)
                }
            }
            BucketAnchor::Latest => {
                let last = history.back()?;
                let len = history.len();
                if timeframe.is_tick() {
                    (len - 1, len)
                } else {
                    let bucket = timeframe.align(&last.timestamp());
                    let run = history
                        .iter()
                        .rev()
                        .take_while(|t| timeframe.align(&t.timestamp()) == bucket)
                        .count();
                    (len - run, len)
                }
            }
        };

        let mut window = history.range(start..end);
        let mut ohlc = Ohlc::from_price(window.next()?.price());
        for tick in window {
            ohlc.update(tick.price());
        }
        Some(ohlc)
    }

    /// Number of ticks retained for the instrument.
    #[must_use]
    pub fn len(&self, instrument: &InstrumentCode) -> usize {
        self.histories.read().get(instrument).map_or(0, VecDeque::len)
    }

    /// Whether nothing has been stored for the instrument.
    #[must_use]
    pub fn is_empty(&self, instrument: &InstrumentCode) -> bool {
        self.len(instrument) == 0
    }

    /// Instruments with history, sorted.
    #[must_use]
    pub fn instruments(&self) -> Vec<InstrumentCode> {
        let mut codes: Vec<_> = self.histories.read().keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Store-wide counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let histories = self.histories.read();
        StoreStats {
            instruments: histories.len(),
            retained_ticks: histories.values().map(VecDeque::len).sum(),
            appended_total: self.appended.load(Ordering::Relaxed),
            evicted_total: self.evicted.load(Ordering::Relaxed),
        }
    }
}
