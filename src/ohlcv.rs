// =============================================================================
// OHLCV backfill — timeframe table and page planning
// =============================================================================
//
// Bitget's history-candles endpoint returns at most 200 bars per request, so
// a backfill of N bars is split into consecutive windows of 200 bars. Each
// window starts 1 ms after the previous window's nominal end so no bar is
// requested twice.
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExchangeError;
use crate::types::Candle;

/// Maximum bars Bitget returns from one history request.
pub const PAGE_LIMIT: u32 = 200;

/// Supported candle intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::D1,
    ];

    /// Bar length in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::M30 => 1_800_000,
            Self::H1 => 3_600_000,
            Self::H2 => 7_200_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }

    /// Key used throughout the public API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Bitget `granularity` parameter.
    pub fn granularity(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1H",
            Self::H2 => "2H",
            Self::H4 => "4H",
            Self::D1 => "1D",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| ExchangeError::UnsupportedTimeframe(s.to_string()))
    }
}

/// One history request: inclusive millisecond bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Split the `limit` bars ending at `end_ms` into page-sized request windows.
///
/// Returns an empty plan when `limit` is zero.
pub fn plan_windows(timeframe: Timeframe, limit: u32, end_ms: i64) -> Vec<Window> {
    let tf_ms = timeframe.millis();
    let page_span = i64::from(PAGE_LIMIT) * tf_ms;
    let start_ms = end_ms - i64::from(limit) * tf_ms;

    let mut windows = Vec::new();
    let mut cursor = start_ms;
    while cursor < end_ms {
        windows.push(Window {
            start_ms: cursor,
            end_ms: (cursor + page_span).min(end_ms),
        });
        cursor += page_span + 1;
    }
    windows
}

/// Sort raw rows ascending by open time and drop rows that repeat a
/// timestamp already seen.
pub fn assemble(mut rows: Vec<[f64; 6]>) -> Vec<Candle> {
    rows.sort_by(|a, b| a[0].total_cmp(&b[0]));
    rows.dedup_by(|a, b| a[0] == b[0]);

    rows.into_iter()
        .filter_map(|row| {
            let ts = row[0] as i64;
            match DateTime::<Utc>::from_timestamp_millis(ts) {
                Some(timestamp) => Some(Candle {
                    timestamp,
                    open: row[1],
                    high: row[2],
                    low: row[3],
                    close: row[4],
                    volume: row[5],
                }),
                None => {
                    warn!(ts, "dropping candle with out-of-range timestamp");
                    None
                }
            }
        })
        .collect()
}
