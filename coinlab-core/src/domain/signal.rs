use super::ids::PositionId;
use super::order::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A strategy's (or the risk manager's) intent to trade.
///
/// A `quantity` of zero on an opening signal asks the risk manager to size
/// the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// Exit a specific position rather than the first match for the symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<PositionId>,
    /// Protective stop used for risk-based sizing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            timestamp,
            reason: reason.into(),
            position_id: None,
            stop_loss: None,
        }
    }

    pub fn buy(symbol: impl Into<String>, quantity: f64, price: f64, at: DateTime<Utc>) -> Self {
        Self::new(symbol, Side::Buy, quantity, price, at, "buy")
    }

    pub fn sell(symbol: impl Into<String>, quantity: f64, price: f64, at: DateTime<Utc>) -> Self {
        Self::new(symbol, Side::Sell, quantity, price, at, "sell")
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn for_position(mut self, id: PositionId) -> Self {
        self.position_id = Some(id);
        self
    }

    pub fn with_stop_loss(mut self, stop: f64) -> Self {
        self.stop_loss = Some(stop);
        self
    }
}
