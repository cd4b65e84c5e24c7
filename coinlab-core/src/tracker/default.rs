use super::{PositionBook, PositionTracker, TrackerError};
use crate::domain::{Position, PositionId, Side};
use chrono::{DateTime, Utc};

/// One open position per (symbol, side); exits hit the first match.
#[derive(Debug, Clone, Default)]
pub struct DefaultPositionTracker {
    book: PositionBook,
}

impl DefaultPositionTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionTracker for DefaultPositionTracker {
    fn book(&self) -> &PositionBook {
        &self.book
    }

    fn book_mut(&mut self) -> &mut PositionBook {
        &mut self.book
    }

    fn open(
        &mut self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        at: DateTime<Utc>,
    ) -> Result<Position, TrackerError> {
        if self.find_open(symbol, side).is_some() {
            return Err(TrackerError::AlreadyOpen {
                symbol: symbol.to_string(),
                side,
            });
        }
        self.book.insert(symbol, side, entry_price, quantity, at)
    }

    fn match_exit(
        &self,
        symbol: &str,
        side: Side,
        _position_id: Option<PositionId>,
    ) -> Option<PositionId> {
        self.find_open(symbol, side).map(|p| p.id)
    }

    fn name(&self) -> &str {
        "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn open_close_round_trip() {
        let mut tracker = DefaultPositionTracker::new();
        let pos = tracker.open("BTCUSDT", Side::Buy, 100.0, 2.0, t(0)).unwrap();
        assert_eq!(tracker.open_positions().len(), 1);

        let closed = tracker.close(pos.id, 110.0, t(3), "signal").unwrap();
        assert_eq!(closed.profit_loss, 20.0);
        assert!((closed.profit_loss_pct - 10.0).abs() < 1e-12);
        assert!(tracker.open_positions().is_empty());
        assert_eq!(tracker.closed_positions().len(), 1);

        assert_eq!(
            tracker.close(pos.id, 110.0, t(4), "again"),
            Err(TrackerError::NotFound(pos.id))
        );
    }

    #[test]
    fn one_position_per_symbol_and_side() {
        let mut tracker = DefaultPositionTracker::new();
        tracker.open("BTCUSDT", Side::Buy, 100.0, 1.0, t(0)).unwrap();
        assert!(matches!(
            tracker.open("BTCUSDT", Side::Buy, 101.0, 1.0, t(1)),
            Err(TrackerError::AlreadyOpen { .. })
        ));
        tracker.open("BTCUSDT", Side::Sell, 101.0, 1.0, t(1)).unwrap();
        tracker.open("ETHUSDT", Side::Buy, 10.0, 1.0, t(1)).unwrap();
        assert_eq!(tracker.open_positions().len(), 3);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut tracker = DefaultPositionTracker::new();
        let a = tracker.open("BTCUSDT", Side::Buy, 100.0, 1.0, t(0)).unwrap();
        tracker.close(a.id, 100.0, t(1), "x").unwrap();
        let b = tracker.open("BTCUSDT", Side::Buy, 100.0, 1.0, t(2)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn reduce_then_close_remaining() {
        let mut tracker = DefaultPositionTracker::new();
        let pos = tracker.open("ETHUSDT", Side::Sell, 200.0, 4.0, t(0)).unwrap();
        let part = tracker.reduce(pos.id, 1.0, 180.0, t(1), "tp1").unwrap();
        assert_eq!(part.quantity, 1.0);
        assert_eq!(part.profit_loss, 20.0);
        assert_eq!(tracker.get(pos.id).unwrap().quantity, 3.0);

        let rest = tracker.reduce(pos.id, 5.0, 190.0, t(2), "exit").unwrap();
        assert_eq!(rest.quantity, 3.0);
        assert!(tracker.get(pos.id).is_none());
        assert_eq!(tracker.closed_positions().len(), 2);
    }

    #[test]
    fn unrealized_pnl_needs_every_price() {
        let mut tracker = DefaultPositionTracker::new();
        tracker.open("BTCUSDT", Side::Buy, 100.0, 1.0, t(0)).unwrap();
        tracker.open("ETHUSDT", Side::Sell, 50.0, 2.0, t(0)).unwrap();

        let mut prices = HashMap::from([("BTCUSDT".to_string(), 105.0)]);
        assert_eq!(
            tracker.unrealized_pnl(&prices),
            Err(TrackerError::MissingPrice {
                symbol: "ETHUSDT".into()
            })
        );
        prices.insert("ETHUSDT".into(), 45.0);
        assert_eq!(tracker.unrealized_pnl(&prices), Ok(15.0));
    }

    #[test]
    fn update_validates_quantity() {
        let mut tracker = DefaultPositionTracker::new();
        let pos = tracker.open("BTCUSDT", Side::Buy, 100.0, 1.0, t(0)).unwrap();
        tracker.update(pos.id, 0.5, t(1)).unwrap();
        assert_eq!(tracker.get(pos.id).unwrap().quantity, 0.5);
        assert!(tracker.update(pos.id, 0.0, t(1)).is_err());
        assert!(tracker.update(PositionId(99), 1.0, t(1)).is_err());
    }
}
