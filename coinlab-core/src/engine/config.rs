//! Kernel configuration and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::costs::{FeeConfig, SlippageConfig};
use crate::data::LoadError;
use crate::domain::{Interval, OrderError};
use crate::risk::RiskParameters;
use crate::strategy::StrategyError;
use crate::tracker::TrackerKind;

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    pub symbols: Vec<String>,
    pub interval: Interval,
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default)]
    pub tracker: TrackerKind,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub slippage: SlippageConfig,
    /// `None` runs without a risk manager; signal quantities pass through.
    #[serde(default)]
    pub risk: Option<RiskParameters>,
}

impl EngineConfig {
    /// Frictionless, long-only, default tracker, no risk manager.
    pub fn new(
        symbols: Vec<String>,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_capital: f64,
    ) -> Self {
        Self {
            start,
            end,
            initial_capital,
            symbols,
            interval,
            allow_short: false,
            tracker: TrackerKind::Default,
            fees: FeeConfig::Zero,
            slippage: SlippageConfig::Zero,
            risk: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbols.is_empty() {
            return Err(EngineError::Config("at least one symbol is required".into()));
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(EngineError::Config(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.start > self.end {
            return Err(EngineError::Config(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        self.fees
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.slippage
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        if let Some(risk) = &self.risk {
            risk.validate()
                .map_err(|e| EngineError::Config(e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to load {symbol}: {source}")]
    Load {
        symbol: String,
        #[source]
        source: LoadError,
    },

    #[error("strategy failed at {timestamp}: {source}")]
    Strategy {
        timestamp: DateTime<Utc>,
        #[source]
        source: StrategyError,
    },

    #[error("invalid engine config: {0}")]
    Config(String),

    #[error(transparent)]
    Order(#[from] OrderError),
}
