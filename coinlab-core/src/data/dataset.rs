//! The per-run market data bundle and its quality diagnostics.

use crate::domain::{Candle, DatasetHash, Interval, MarketEvent, OrderBookSnapshot, Ticker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Non-fatal data issue observed while loading or preprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    SkippedRow {
        line: u64,
        reason: String,
    },
    DuplicateTimestamp {
        open_time: DateTime<Utc>,
    },
    InconsistentOhlc {
        open_time: DateTime<Utc>,
    },
    GapFilled {
        open_time: DateTime<Utc>,
    },
    OffGrid {
        open_time: DateTime<Utc>,
    },
    OutlierCapped {
        open_time: DateTime<Utc>,
        field: String,
        original: f64,
        capped: f64,
    },
    ResampleSkipped {
        from: Interval,
        to: Interval,
    },
    UnevenResample {
        from: Interval,
        to: Interval,
    },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityWarning::SkippedRow { line, reason } => {
                write!(f, "line {line} skipped: {reason}")
            }
            DataQualityWarning::DuplicateTimestamp { open_time } => {
                write!(f, "duplicate candle at {open_time} dropped")
            }
            DataQualityWarning::InconsistentOhlc { open_time } => {
                write!(f, "candle at {open_time} had inconsistent OHLC, re-clamped")
            }
            DataQualityWarning::GapFilled { open_time } => {
                write!(f, "missing candle at {open_time} interpolated")
            }
            DataQualityWarning::OffGrid { open_time } => {
                write!(f, "candle at {open_time} is off the interval grid, dropped")
            }
            DataQualityWarning::OutlierCapped {
                open_time,
                field,
                original,
                capped,
            } => write!(
                f,
                "{field} at {open_time} capped from {original} to {capped:.6}"
            ),
            DataQualityWarning::ResampleSkipped { from, to } => {
                write!(f, "cannot resample {from} to finer {to}, left unchanged")
            }
            DataQualityWarning::UnevenResample { from, to } => {
                write!(f, "{to} is not a whole multiple of {from}, ratio truncated")
            }
        }
    }
}

/// Candles plus optional ticker and order-book snapshots for one symbol.
///
/// Owned by exactly one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    pub symbol: String,
    pub interval: Interval,
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub tickers: BTreeMap<DateTime<Utc>, Ticker>,
    #[serde(default)]
    pub order_books: BTreeMap<DateTime<Utc>, OrderBookSnapshot>,
    #[serde(default)]
    pub diagnostics: Vec<DataQualityWarning>,
}

impl DataSet {
    pub fn new(symbol: impl Into<String>, interval: Interval, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            candles,
            tickers: BTreeMap::new(),
            order_books: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Market event for the candle at `index`, with any snapshots taken at
    /// the same open time.
    pub fn market_event(&self, index: usize) -> Option<MarketEvent> {
        let candle = self.candles.get(index)?;
        Some(MarketEvent {
            symbol: self.symbol.clone(),
            timestamp: candle.open_time,
            candle: candle.clone(),
            ticker: self.tickers.get(&candle.open_time).cloned(),
            order_book: self.order_books.get(&candle.open_time).cloned(),
        })
    }

    /// BLAKE3 hash over the candle series.
    pub fn fingerprint(&self) -> DatasetHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.symbol.as_bytes());
        hasher.update(self.interval.as_str().as_bytes());
        for c in &self.candles {
            hasher.update(&c.open_time.timestamp_millis().to_le_bytes());
            for v in [c.open, c.high, c.low, c.close, c.volume] {
                hasher.update(&v.to_le_bytes());
            }
        }
        DatasetHash(hasher.finalize().to_hex().to_string())
    }
}
