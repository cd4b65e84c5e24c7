//! Market payloads delivered to strategies.

use super::candle::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-of-book ticker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub timestamp: DateTime<Utc>,
    pub last_price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume_24h: f64,
}

/// One price level: `(price, quantity)`.
pub type BookLevel = (f64, f64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }
}

/// Everything observed for a symbol at one candle open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub candle: Candle,
    pub ticker: Option<Ticker>,
    pub order_book: Option<OrderBookSnapshot>,
}
