//! Risk management.
//!
//! - `params`: `RiskParameters` and their validation
//! - `manager`: the `RiskManager` trait and `StandardRiskManager`
//! - `ratchet`: stops that only tighten

pub mod manager;
pub mod params;
pub mod ratchet;

pub use manager::{
    RiskDenial, RiskManager, SizingDecision, SizingRequest, StandardRiskManager, TakeProfitLevel,
    TRAILING_STOP_REASON,
};
pub use params::{RiskConfigError, RiskParameters};
pub use ratchet::RatchetState;
