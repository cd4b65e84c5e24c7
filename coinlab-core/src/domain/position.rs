use super::ids::PositionId;
use super::order::Side;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub open_time: DateTime<Utc>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Sell
    }

    /// Entry notional, `quantity * entry_price`.
    pub fn notional(&self) -> f64 {
        self.quantity * self.entry_price
    }

    /// P&L if the whole position were closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            Side::Buy => (price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - price) * self.quantity,
        }
    }

    /// Contribution to equity at `price`.
    ///
    /// Longs are worth `qty * price`. Shorts hold their entry collateral plus
    /// the mark-to-market gain: `qty * entry + (entry - price) * qty`.
    pub fn mark_value(&self, price: f64) -> f64 {
        match self.side {
            Side::Buy => self.quantity * price,
            Side::Sell => self.notional() + self.pnl_at(price),
        }
    }

    /// Realize `quantity` units of this position at `exit_price`.
    pub fn realize(
        &self,
        quantity: f64,
        exit_price: f64,
        close_time: DateTime<Utc>,
        exit_reason: impl Into<String>,
    ) -> ClosedPosition {
        let slice = Position {
            quantity,
            ..self.clone()
        };
        let profit_loss = slice.pnl_at(exit_price);
        let basis = slice.notional();
        let profit_loss_pct = if basis != 0.0 {
            profit_loss / basis * 100.0
        } else {
            0.0
        };
        ClosedPosition {
            id: self.id,
            symbol: self.symbol.clone(),
            side: self.side,
            quantity,
            entry_price: self.entry_price,
            open_time: self.open_time,
            exit_price,
            close_time,
            profit_loss,
            profit_loss_pct,
            exit_reason: exit_reason.into(),
        }
    }
}

/// A realized trade.
///
/// `profit_loss` is `(exit - entry) * qty` for Buy and `(entry - exit) * qty`
/// for Sell, before fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub open_time: DateTime<Utc>,
    pub exit_price: f64,
    pub close_time: DateTime<Utc>,
    pub profit_loss: f64,
    pub profit_loss_pct: f64,
    pub exit_reason: String,
}

impl ClosedPosition {
    pub fn holding_period(&self) -> Duration {
        self.close_time - self.open_time
    }

    pub fn is_winner(&self) -> bool {
        self.profit_loss > 0.0
    }

    pub fn is_loser(&self) -> bool {
        self.profit_loss < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position(side: Side) -> Position {
        Position {
            id: PositionId(1),
            symbol: "BTCUSDT".into(),
            side,
            quantity: 2.0,
            entry_price: 100.0,
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn long_pnl_and_mark() {
        let p = position(Side::Buy);
        assert_eq!(p.pnl_at(110.0), 20.0);
        assert_eq!(p.mark_value(110.0), 220.0);
    }

    #[test]
    fn short_pnl_and_mark_are_symmetric() {
        let p = position(Side::Sell);
        assert_eq!(p.pnl_at(90.0), 20.0);
        assert_eq!(p.pnl_at(110.0), -20.0);
        // collateral 200 plus gain 20
        assert_eq!(p.mark_value(90.0), 220.0);
    }

    #[test]
    fn realize_partial_slice() {
        let p = position(Side::Buy);
        let t = p.open_time + Duration::hours(5);
        let closed = p.realize(0.5, 120.0, t, "take profit");
        assert_eq!(closed.quantity, 0.5);
        assert_eq!(closed.profit_loss, 10.0);
        assert!((closed.profit_loss_pct - 20.0).abs() < 1e-12);
        assert_eq!(closed.holding_period(), Duration::hours(5));
        assert!(closed.is_winner());
    }
}
