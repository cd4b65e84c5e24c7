//! Slippage models: per-unit adverse price adjustment on a fill.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::{check_range, check_rate, uniform, CostConfigError, TradeContext};
use crate::rng::RngHierarchy;

/// Slippage model: price units added to (Buy) or subtracted from (Sell) the
/// reference price.
pub trait SlippageModel: Send + Sync {
    fn slippage(&mut self, trade: &TradeContext<'_>) -> f64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroSlippage;

impl SlippageModel for ZeroSlippage {
    fn slippage(&mut self, _trade: &TradeContext<'_>) -> f64 {
        0.0
    }

    fn name(&self) -> &str {
        "zero"
    }
}

/// `price * rate`, with `rate` a fraction (0.001 = 10 bps).
#[derive(Debug, Clone, Copy)]
pub struct FixedSlippage {
    pub rate: f64,
}

impl SlippageModel for FixedSlippage {
    fn slippage(&mut self, trade: &TradeContext<'_>) -> f64 {
        trade.price * self.rate
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// `price * U(min_pct, max_pct) / 100`, reproducible from `seed`.
#[derive(Debug, Clone)]
pub struct VariableSlippage {
    min_pct: f64,
    max_pct: f64,
    rng: StdRng,
}

impl VariableSlippage {
    pub fn new(min_pct: f64, max_pct: f64, seed: u64) -> Self {
        Self {
            min_pct,
            max_pct,
            rng: RngHierarchy::new(seed).rng_for("slippage", 0),
        }
    }
}

impl SlippageModel for VariableSlippage {
    fn slippage(&mut self, trade: &TradeContext<'_>) -> f64 {
        trade.price * uniform(&mut self.rng, self.min_pct, self.max_pct) / 100.0
    }

    fn name(&self) -> &str {
        "variable"
    }
}

fn default_seed() -> u64 {
    42
}

/// Serializable slippage selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlippageConfig {
    #[default]
    Zero,
    Fixed {
        rate: f64,
    },
    Variable {
        min_pct: f64,
        max_pct: f64,
        #[serde(default = "default_seed")]
        seed: u64,
    },
}

impl SlippageConfig {
    pub fn validate(&self) -> Result<(), CostConfigError> {
        match self {
            SlippageConfig::Zero => Ok(()),
            SlippageConfig::Fixed { rate } => check_rate("fixed slippage", *rate),
            SlippageConfig::Variable {
                min_pct, max_pct, ..
            } => check_range("variable slippage", *min_pct, *max_pct),
        }
    }

    pub fn build(&self) -> Box<dyn SlippageModel> {
        match self {
            SlippageConfig::Zero => Box::new(ZeroSlippage),
            SlippageConfig::Fixed { rate } => Box::new(FixedSlippage { rate: *rate }),
            SlippageConfig::Variable {
                min_pct,
                max_pct,
                seed,
            } => Box::new(VariableSlippage::new(*min_pct, *max_pct, *seed)),
        }
    }
}
