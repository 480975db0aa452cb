//! Timeframes and bucket alignment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Aggregation timeframe.
///
/// Canonical names are `tick`, `1m`, `5m`, `15m`, `30m`, `1h`, `4h` and `1d`.
/// The older `m1`/`h4`/`D` spellings are accepted when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeframe {
    /// Raw ticks; every tick is its own bucket.
    #[default]
    #[serde(rename = "tick")]
    Tick,
    /// One minute.
    #[serde(rename = "1m", alias = "m1")]
    OneMinute,
    /// Five minutes.
    #[serde(rename = "5m", alias = "m5")]
    FiveMinutes,
    /// Fifteen minutes.
    #[serde(rename = "15m", alias = "m15")]
    FifteenMinutes,
    /// Thirty minutes.
    #[serde(rename = "30m", alias = "m30")]
    ThirtyMinutes,
    /// One hour.
    #[serde(rename = "1h", alias = "h1")]
    OneHour,
    /// Four hours, anchored at 00/04/08/12/16/20 local time.
    #[serde(rename = "4h", alias = "h4")]
    FourHours,
    /// One day.
    #[serde(rename = "1d", alias = "D")]
    OneDay,
}

/// Error returned for an unrecognized timeframe string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized timeframe: {0}")]
pub struct ParseTimeframeError(pub String);

impl Timeframe {
    /// Every timeframe, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Tick,
            Self::OneMinute,
            Self::FiveMinutes,
            Self::FifteenMinutes,
            Self::ThirtyMinutes,
            Self::OneHour,
            Self::FourHours,
            Self::OneDay,
        ]
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Whether this is the raw tick timeframe.
    #[must_use]
    pub const fn is_tick(self) -> bool {
        matches!(self, Self::Tick)
    }

    /// Bucket width. `None` for [`Timeframe::Tick`].
    #[must_use]
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::Tick => None,
            Self::OneMinute => Some(Duration::from_secs(60)),
            Self::FiveMinutes => Some(Duration::from_secs(5 * 60)),
            Self::FifteenMinutes => Some(Duration::from_secs(15 * 60)),
            Self::ThirtyMinutes => Some(Duration::from_secs(30 * 60)),
            Self::OneHour => Some(Duration::from_secs(60 * 60)),
            Self::FourHours => Some(Duration::from_secs(4 * 60 * 60)),
            Self::OneDay => Some(Duration::from_secs(24 * 60 * 60)),
        }
    }

    /// Start of the bucket containing `timestamp`.
    ///
    /// Fixed-width timeframes truncate on the absolute timeline (the day
    /// bucket therefore starts at 00:00 UTC). The four-hour bucket is the
    /// exception: it is anchored on the wall-clock hour in the timestamp's own
    /// zone. `Tick` returns the timestamp unchanged.
    #[must_use]
    pub fn align<Tz: TimeZone>(self, timestamp: &DateTime<Tz>) -> DateTime<Tz> {
        match self {
            Self::Tick => timestamp.clone(),
            Self::FourHours => align_local_hours(timestamp, 4),
            Self::OneMinute => truncate(timestamp, 60),
            Self::FiveMinutes => truncate(timestamp, 5 * 60),
            Self::FifteenMinutes => truncate(timestamp, 15 * 60),
            Self::ThirtyMinutes => truncate(timestamp, 30 * 60),
            Self::OneHour => truncate(timestamp, 60 * 60),
            Self::OneDay => truncate(timestamp, 24 * 60 * 60),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tick" => Ok(Self::Tick),
            "1m" | "m1" => Ok(Self::OneMinute),
            "5m" | "m5" => Ok(Self::FiveMinutes),
            "15m" | "m15" => Ok(Self::FifteenMinutes),
            "30m" | "m30" => Ok(Self::ThirtyMinutes),
            "1h" | "h1" => Ok(Self::OneHour),
            "4h" | "h4" => Ok(Self::FourHours),
            "1d" | "D" => Ok(Self::OneDay),
            other => Err(ParseTimeframeError(other.to_string())),
        }
    }
}

fn truncate<Tz: TimeZone>(timestamp: &DateTime<Tz>, width_secs: i64) -> DateTime<Tz> {
    let secs = timestamp.timestamp();
    let start = secs - secs.rem_euclid(width_secs);
    DateTime::from_timestamp(start, 0).map_or_else(
        || timestamp.clone(),
        |utc| utc.with_timezone(&timestamp.timezone()),
    )
}

fn align_local_hours<Tz: TimeZone>(timestamp: &DateTime<Tz>, step: u32) -> DateTime<Tz> {
    let local = timestamp.naive_local();
    let hour = local.hour() / step * step;
    local
        .date()
        .and_hms_opt(hour, 0, 0)
        .and_then(|start| timestamp.timezone().from_local_datetime(&start).earliest())
        .unwrap_or_else(|| timestamp.clone())
}
