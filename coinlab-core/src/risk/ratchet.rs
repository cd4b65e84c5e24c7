//! Stop levels that may tighten but never loosen.

use crate::domain::Side;

/// Stop level for one position.
///
/// - Long (Buy) positions: the stop only rises
/// - Short (Sell) positions: the stop only falls
#[derive(Debug, Clone, PartialEq)]
pub struct RatchetState {
    level: f64,
    side: Side,
}

impl RatchetState {
    pub fn new(side: Side, initial_level: f64) -> Self {
        Self {
            level: initial_level,
            side,
        }
    }

    /// Move the stop to `proposed` if that tightens it. Returns the level
    /// in force afterwards.
    pub fn apply(&mut self, proposed: f64) -> f64 {
        self.level = match self.side {
            Side::Buy => self.level.max(proposed),
            Side::Sell => self.level.min(proposed),
        };
        self.level
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// Whether `price` has crossed the stop against the position.
    pub fn is_hit(&self, price: f64) -> bool {
        match self.side {
            Side::Buy => price <= self.level,
            Side::Sell => price >= self.level,
        }
    }
}
