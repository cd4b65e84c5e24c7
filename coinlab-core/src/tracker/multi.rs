use super::{PositionBook, PositionTracker, TrackerError};
use crate::domain::{Position, PositionId, Side};
use chrono::{DateTime, Utc};

/// Any number of positions per symbol; exits may target a position id.
#[derive(Debug, Clone, Default)]
pub struct MultiPositionTracker {
    book: PositionBook,
}

impl MultiPositionTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionTracker for MultiPositionTracker {
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
        self.book.insert(symbol, side, entry_price, quantity, at)
    }

    fn match_exit(
        &self,
        symbol: &str,
        side: Side,
        position_id: Option<PositionId>,
    ) -> Option<PositionId> {
        match position_id {
            Some(id) => self
                .book
                .get(id)
                .filter(|p| p.symbol == symbol && p.side == side)
                .map(|p| p.id),
            None => self.find_open(symbol, side).map(|p| p.id),
        }
    }

    fn name(&self) -> &str {
        "multi"
    }
}
