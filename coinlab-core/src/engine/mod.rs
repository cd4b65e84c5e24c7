//! Event-driven simulation kernel.
//!
//! Market events for every symbol are merged into one queue ordered by
//! timestamp, then insertion order. Each pop dispatches one of:
//! - `MarketData`: risk exits, strategy callbacks, equity point
//! - `Signal`: resolve open/close, risk sizing, market order at last price
//! - `Order`: slippage, fee, cash check, tracker update
//! - `OrderFilled`: strategy notification (fills and rejections)
//! - `PositionOpen` / `PositionClose`: risk-manager hooks

pub mod config;
pub mod event;
pub mod journal;
pub mod kernel;

pub use config::{EngineConfig, EngineError};
pub use event::{Event, EventKind, EventQueue};
pub use journal::{EventRecord, JournalEntry};
pub use kernel::Engine;
