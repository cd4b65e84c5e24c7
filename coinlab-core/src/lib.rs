//! coinlab core: the pieces of a single crypto backtest.
//!
//! - Domain types (candles, orders, signals, positions)
//! - Data loading and preprocessing (CSV, Parquet table, in-memory)
//! - Fee and slippage models
//! - Position tracking and the risk manager
//! - The event-driven kernel and the strategy contract
//! - Result aggregation (equity and drawdown curves)

pub mod cancel;
pub mod costs;
pub mod data;
pub mod domain;
pub mod engine;
pub mod result;
pub mod risk;
pub mod rng;
pub mod strategy;
pub mod tracker;

pub use cancel::CancelToken;
pub use engine::{Engine, EngineConfig, EngineError};
pub use result::BacktestResult;
