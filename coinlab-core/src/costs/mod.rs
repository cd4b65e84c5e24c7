//! Fee and slippage models.
//!
//! Both are evaluated per trade over `(symbol, side, qty, price, timestamp)`.
//! The kernel turns them into a fill:
//! - `exec = price + slippage` for Buy, `price - slippage` for Sell
//! - `fee = fee_rate * exec * qty`

pub mod fees;
pub mod slippage;

use chrono::{DateTime, Utc};

use crate::domain::Side;

pub use fees::{
    FeeConfig, FeeModel, FeeTier, FixedFee, PerExchangeFee, TieredFee, VariableFee, ZeroFee,
};
pub use slippage::{FixedSlippage, SlippageConfig, SlippageModel, VariableSlippage, ZeroSlippage};

/// The trade a cost model is asked to price.
#[derive(Debug, Clone, Copy)]
pub struct TradeContext<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CostConfigError {
    #[error("{model}: {message}")]
    Invalid { model: &'static str, message: String },
}

fn check_range(model: &'static str, min: f64, max: f64) -> Result<(), CostConfigError> {
    if !(min.is_finite() && max.is_finite()) || min < 0.0 || max < min {
        return Err(CostConfigError::Invalid {
            model,
            message: format!("expected 0 <= min <= max, got min={min} max={max}"),
        });
    }
    Ok(())
}

fn check_rate(model: &'static str, rate: f64) -> Result<(), CostConfigError> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(CostConfigError::Invalid {
            model,
            message: format!("rate must be a non-negative number, got {rate}"),
        });
    }
    Ok(())
}

/// Draw from `U(min, max)`, collapsing an empty range to `min`.
fn uniform(rng: &mut rand::rngs::StdRng, min: f64, max: f64) -> f64 {
    use rand::Rng;
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}
