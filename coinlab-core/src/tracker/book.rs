use super::{TrackerError, QTY_EPSILON};
use crate::domain::{ClosedPosition, IdGen, Position, PositionId, Side};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Open and closed positions, indexed by id.
#[derive(Debug, Clone)]
pub struct PositionBook {
    open: BTreeMap<PositionId, Position>,
    closed: Vec<ClosedPosition>,
    ids: IdGen,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            open: BTreeMap::new(),
            closed: Vec::new(),
            ids: IdGen::new(),
        }
    }

    pub fn insert(
        &mut self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        at: DateTime<Utc>,
    ) -> Result<Position, TrackerError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(TrackerError::InvalidQuantity { quantity });
        }
        let position = Position {
            id: PositionId(self.ids.next_id()),
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price,
            open_time: at,
        };
        self.open.insert(position.id, position.clone());
        Ok(position)
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.open.get(&id)
    }

    pub fn open(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn closed(&self) -> &[ClosedPosition] {
        &self.closed
    }

    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: f64,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ClosedPosition, TrackerError> {
        let position = self.open.remove(&id).ok_or(TrackerError::NotFound(id))?;
        let closed = position.realize(position.quantity, exit_price, at, reason);
        self.closed.push(closed.clone());
        Ok(closed)
    }

    pub fn reduce(
        &mut self,
        id: PositionId,
        quantity: f64,
        exit_price: f64,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ClosedPosition, TrackerError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(TrackerError::InvalidQuantity { quantity });
        }
        let position = self.open.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
        if quantity >= position.quantity - QTY_EPSILON {
            return self.close(id, exit_price, at, reason);
        }
        let closed = position.realize(quantity, exit_price, at, reason);
        position.quantity -= quantity;
        self.closed.push(closed.clone());
        Ok(closed)
    }

    pub fn update(&mut self, id: PositionId, quantity: f64, at: DateTime<Utc>) -> Result<(), TrackerError> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(TrackerError::InvalidQuantity { quantity });
        }
        let position = self.open.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
        tracing::debug!(%id, from = position.quantity, to = quantity, %at, "position resized");
        position.quantity = quantity;
        Ok(())
    }
}
