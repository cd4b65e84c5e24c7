//! Orders and their lifecycle.
//!
//! An order is created by the kernel for each accepted signal and reaches a
//! terminal state within the same event tick:
//! - `New -> Filled` when the ledger can absorb it
//! - `New -> Rejected` otherwise, carrying a `RejectReason`

use super::ids::{OrderId, PositionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for Buy, -1 for Sell.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Filled,
    Rejected,
}

/// Why the ledger refused an order. Business outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientFunds { required: f64, available: f64 },
    PositionNotFound { symbol: String },
    PositionAlreadyOpen { symbol: String },
    InvalidQuantity { quantity: f64 },
    NoPrice { symbol: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "insufficient funds: required {required:.2}, available {available:.2}"
            ),
            RejectReason::PositionNotFound { symbol } => {
                write!(f, "no open position for {symbol}")
            }
            RejectReason::PositionAlreadyOpen { symbol } => {
                write!(f, "position already open for {symbol}")
            }
            RejectReason::InvalidQuantity { quantity } => write!(f, "invalid quantity {quantity}"),
            RejectReason::NoPrice { symbol } => write!(f, "no price observed for {symbol}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("order {id} is already {status:?}")]
    AlreadyTerminal { id: OrderId, status: OrderStatus },
}

/// A simulated order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Reference price at creation, replaced by the execution price on fill.
    pub price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub fee: f64,
    /// Per-unit slippage applied to the execution price.
    pub slippage: f64,
    /// Target position for exits that name one (stops, take-profits).
    pub position_id: Option<PositionId>,
    /// Reason carried over from the originating signal.
    pub reason: String,
    pub reject_reason: Option<RejectReason>,
}

impl Order {
    pub fn market(
        id: OrderId,
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price,
            status: OrderStatus::New,
            created_at,
            filled_at: None,
            fee: 0.0,
            slippage: 0.0,
            position_id: None,
            reason: String::new(),
            reject_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != OrderStatus::New
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }

    /// Transition `New -> Filled`.
    pub fn fill(
        &mut self,
        exec_price: f64,
        quantity: f64,
        fee: f64,
        slippage: f64,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.ensure_new()?;
        self.status = OrderStatus::Filled;
        self.price = exec_price;
        self.quantity = quantity;
        self.fee = fee;
        self.slippage = slippage;
        self.filled_at = Some(at);
        Ok(())
    }

    /// Transition `New -> Rejected`.
    pub fn reject(&mut self, reason: RejectReason) -> Result<(), OrderError> {
        self.ensure_new()?;
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason);
        Ok(())
    }

    fn ensure_new(&self) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_order() -> Order {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Order::market(OrderId(1), "ETHUSDT", Side::Buy, 2.0, 3000.0, t)
    }

    #[test]
    fn fill_is_terminal() {
        let mut order = new_order();
        let t = order.created_at;
        order.fill(3001.0, 2.0, 6.0, 1.0, t).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.price, 3001.0);
        assert_eq!(order.filled_at, Some(t));
        assert!(order.reject(RejectReason::InvalidQuantity { quantity: 0.0 }).is_err());
    }

    #[test]
    fn reject_is_terminal() {
        let mut order = new_order();
        order
            .reject(RejectReason::InsufficientFunds {
                required: 6000.0,
                available: 10.0,
            })
            .unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        let t = order.created_at;
        assert!(matches!(
            order.fill(1.0, 1.0, 0.0, 0.0, t),
            Err(OrderError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn side_helpers() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.sign(), -1.0);
    }
}
