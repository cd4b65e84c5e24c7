//! Candle: the fundamental market data unit.

use super::interval::Interval;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candle for one symbol over one interval.
///
/// `close_time = open_time + interval`. Candles are read-only once a
/// `DataSet` has been assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        interval: Interval,
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            open_time,
            close_time: open_time + interval.duration(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close) && self.open.max(self.close) <= self.high
    }

    /// Widen high/low so the OHLC invariant holds again after a field was
    /// rewritten.
    pub fn reclamp(&mut self) {
        self.low = self.low.min(self.open).min(self.close);
        self.high = self.high.max(self.open).max(self.close);
    }
}
