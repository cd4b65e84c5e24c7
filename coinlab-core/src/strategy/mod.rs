//! Strategy contract and the process-wide strategy factory.
//!
//! - `Strategy`: callbacks the kernel drives for every event
//! - `StrategyConfig` / `ParamValue`: typed parameter tree
//! - `StrategyFactory`: name -> constructor registry plus saved configs
//! - `builtin`: reference strategies registered by default

pub mod builtin;
pub mod config;
pub mod factory;

pub use builtin::{BuyAndHold, MaCrossover};
pub use config::{ParamValue, StrategyConfig};
pub use factory::{FactoryError, StrategyConstructor, StrategyFactory};

use crate::domain::{Candle, ClosedPosition, MarketEvent, Order, Signal};
use chrono::{DateTime, Utc};

/// Errors raised by strategy callbacks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("invalid strategy parameter '{param}': {message}")]
    InvalidConfig { param: String, message: String },
    #[error("strategy callback failed: {0}")]
    Callback(String),
}

/// A trading strategy driven by the simulation kernel.
///
/// Callbacks run synchronously on the kernel's thread in event order.
/// Returned signals are queued at the current event time.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), StrategyError>;

    /// Called first for every market event.
    fn on_market_event(&mut self, _event: &MarketEvent) -> Result<Vec<Signal>, StrategyError> {
        Ok(Vec::new())
    }

    /// Called after `on_market_event` with the event's candle.
    fn on_tick(
        &mut self,
        symbol: &str,
        at: DateTime<Utc>,
        candle: &Candle,
    ) -> Result<Vec<Signal>, StrategyError>;

    /// Filled and rejected orders both arrive here; check `order.status`.
    fn on_order_filled(&mut self, _order: &Order) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_position_closed(&mut self, _closed: &ClosedPosition) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Exit signals issued once the event queue has drained.
    fn close_positions(&mut self) -> Result<Vec<Signal>, StrategyError> {
        Ok(Vec::new())
    }

    /// When true, callback errors are journaled and the run continues.
    fn is_fault_tolerant(&self) -> bool {
        false
    }
}
