//! Position tracking: open, reduce and close positions and report P&L.
//!
//! Two trackers share one `PositionBook`:
//! - `DefaultPositionTracker`: at most one open position per (symbol, side),
//!   exits match the first open position for the symbol
//! - `MultiPositionTracker`: any number of positions, exits may name one
//!
//! Cash is not tracked here; the kernel owns the cash ledger.

mod book;
mod default;
mod multi;

pub use book::PositionBook;
pub use default::DefaultPositionTracker;
pub use multi::MultiPositionTracker;

use crate::domain::{ClosedPosition, Position, PositionId, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Quantities closer than this are treated as equal.
pub const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("a {side} position is already open for {symbol}")]
    AlreadyOpen { symbol: String, side: Side },

    #[error("no price for {symbol}")]
    MissingPrice { symbol: String },

    #[error("invalid quantity {quantity}")]
    InvalidQuantity { quantity: f64 },
}

/// Which tracker a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    #[default]
    Default,
    Multi,
}

impl TrackerKind {
    pub fn build(&self) -> Box<dyn PositionTracker> {
        match self {
            TrackerKind::Default => Box::new(DefaultPositionTracker::new()),
            TrackerKind::Multi => Box::new(MultiPositionTracker::new()),
        }
    }
}

pub trait PositionTracker: Send + Sync {
    fn book(&self) -> &PositionBook;

    fn book_mut(&mut self) -> &mut PositionBook;

    fn open(
        &mut self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        at: DateTime<Utc>,
    ) -> Result<Position, TrackerError>;

    /// Resolve which open position an exit should hit.
    fn match_exit(
        &self,
        symbol: &str,
        side: Side,
        position_id: Option<PositionId>,
    ) -> Option<PositionId>;

    fn name(&self) -> &str;

    fn close(
        &mut self,
        id: PositionId,
        exit_price: f64,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ClosedPosition, TrackerError> {
        self.book_mut().close(id, exit_price, at, reason)
    }

    /// Close `quantity` units; closes the whole position when it covers it.
    fn reduce(
        &mut self,
        id: PositionId,
        quantity: f64,
        exit_price: f64,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ClosedPosition, TrackerError> {
        self.book_mut().reduce(id, quantity, exit_price, at, reason)
    }

    fn update(&mut self, id: PositionId, quantity: f64, at: DateTime<Utc>) -> Result<(), TrackerError> {
        self.book_mut().update(id, quantity, at)
    }

    fn get(&self, id: PositionId) -> Option<&Position> {
        self.book().get(id)
    }

    /// Open positions in id order.
    fn open_positions(&self) -> Vec<&Position> {
        self.book().open().collect()
    }

    fn closed_positions(&self) -> &[ClosedPosition] {
        self.book().closed()
    }

    fn find_open(&self, symbol: &str, side: Side) -> Option<&Position> {
        self.book()
            .open()
            .find(|p| p.symbol == symbol && p.side == side)
    }

    fn unrealized_pnl(&self, prices: &HashMap<String, f64>) -> Result<f64, TrackerError> {
        self.book().open().try_fold(0.0, |acc, p| {
            let price = prices
                .get(&p.symbol)
                .ok_or_else(|| TrackerError::MissingPrice {
                    symbol: p.symbol.clone(),
                })?;
            Ok(acc + p.pnl_at(*price))
        })
    }
}
