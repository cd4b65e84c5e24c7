//! Domain types for coinlab

pub mod candle;
pub mod ids;
pub mod interval;
pub mod market;
pub mod order;
pub mod position;
pub mod signal;

pub use candle::Candle;
pub use ids::{DatasetHash, IdGen, OrderId, PositionId};
pub use interval::{Interval, UnknownInterval};
pub use market::{BookLevel, MarketEvent, OrderBookSnapshot, Ticker};
pub use order::{Order, OrderError, OrderStatus, OrderType, RejectReason, Side};
pub use position::{ClosedPosition, Position};
pub use signal::Signal;

/// Symbol type alias
pub type Symbol = String;
