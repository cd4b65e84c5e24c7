//! Typed event journal returned with every result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DatasetHash, OrderId, PositionId, RejectReason, Side};
use crate::risk::RiskDenial;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalEntry {
    StrategyInitialized {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    DataLoaded {
        candles: usize,
        warnings: usize,
        dataset_hash: DatasetHash,
    },
    MarketData {
        close: f64,
        equity: f64,
    },
    Signal {
        side: Side,
        quantity: f64,
        price: f64,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    OrderCreated {
        order_id: OrderId,
        side: Side,
        quantity: f64,
        price: f64,
    },
    #[serde(rename_all = "camelCase")]
    OrderFilled {
        order_id: OrderId,
        side: Side,
        quantity: f64,
        price: f64,
        fee: f64,
        slippage: f64,
    },
    #[serde(rename_all = "camelCase")]
    OrderRejected {
        order_id: OrderId,
        side: Side,
        quantity: f64,
        reason: RejectReason,
    },
    #[serde(rename_all = "camelCase")]
    PositionOpened {
        position_id: PositionId,
        side: Side,
        quantity: f64,
        entry_price: f64,
    },
    #[serde(rename_all = "camelCase")]
    PositionClosed {
        position_id: PositionId,
        side: Side,
        quantity: f64,
        exit_price: f64,
        profit_loss: f64,
        exit_reason: String,
    },
    RiskDenied {
        side: Side,
        reason: RiskDenial,
    },
    StrategyError {
        message: String,
    },
    Cancelled,
}

impl JournalEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            JournalEntry::StrategyInitialized { .. } => "STRATEGY_INITIALIZED",
            JournalEntry::DataLoaded { .. } => "DATA_LOADED",
            JournalEntry::MarketData { .. } => "MARKET_DATA",
            JournalEntry::Signal { .. } => "SIGNAL",
            JournalEntry::OrderCreated { .. } => "ORDER_CREATED",
            JournalEntry::OrderFilled { .. } => "ORDER_FILLED",
            JournalEntry::OrderRejected { .. } => "ORDER_REJECTED",
            JournalEntry::PositionOpened { .. } => "POSITION_OPENED",
            JournalEntry::PositionClosed { .. } => "POSITION_CLOSED",
            JournalEntry::RiskDenied { .. } => "RISK_DENIED",
            JournalEntry::StrategyError { .. } => "STRATEGY_ERROR",
            JournalEntry::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    /// Empty for run-level records.
    pub symbol: String,
    #[serde(flatten)]
    pub entry: JournalEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_flat_with_type_tag() {
        let record = EventRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            symbol: "BTCUSDT".into(),
            entry: JournalEntry::RiskDenied {
                side: Side::Buy,
                reason: RiskDenial::DailyLoss,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "RISK_DENIED");
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["reason"], "daily_loss");
        assert_eq!(record.entry.kind(), "RISK_DENIED");
    }
}
