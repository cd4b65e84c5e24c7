use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("take-profit levels must be positive and strictly increasing")]
    UnorderedLevels,
    #[error("take-profit sizes sum to {0}%, more than 100%")]
    SizesExceedTotal(f64),
    #[error("{sizes} take-profit sizes given for {levels} levels")]
    TooManySizes { sizes: usize, levels: usize },
}

/// Risk limits. Percentages are in percent units (5.0 = 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParameters {
    /// Share of current capital at risk on one trade (stop-based sizing).
    pub max_risk_per_trade_pct: f64,
    /// Per-position notional cap as a share of capital.
    pub max_position_size_pct: f64,
    /// Aggregate open-notional cap as a share of capital.
    pub max_total_exposure_pct: f64,
    pub max_positions: usize,
    /// Opening halts once running drawdown exceeds this.
    pub max_drawdown_pct: f64,
    /// Opening halts once the day's realized loss exceeds this share of
    /// initial capital.
    pub max_daily_loss_pct: f64,
    /// Opening halts while capital is below this amount.
    pub min_account_balance: f64,
    pub use_trailing_stops: bool,
    pub trailing_stop_pct: f64,
    pub use_take_profits: bool,
    /// Distances from entry, in percent.
    pub take_profit_levels: Vec<f64>,
    /// Share of the opening quantity exited at each level, in percent.
    pub take_profit_sizes: Vec<f64>,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_risk_per_trade_pct: 2.0,
            max_position_size_pct: 20.0,
            max_total_exposure_pct: 100.0,
            max_positions: 10,
            max_drawdown_pct: 25.0,
            max_daily_loss_pct: 5.0,
            min_account_balance: 0.0,
            use_trailing_stops: false,
            trailing_stop_pct: 2.0,
            use_take_profits: false,
            take_profit_levels: Vec::new(),
            take_profit_sizes: Vec::new(),
        }
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), RiskConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RiskConfigError::OutOfRange {
            field,
            expected: "> 0",
            value,
        })
    }
}

impl RiskParameters {
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        positive("max_risk_per_trade_pct", self.max_risk_per_trade_pct)?;
        positive("max_position_size_pct", self.max_position_size_pct)?;
        positive("max_total_exposure_pct", self.max_total_exposure_pct)?;
        positive("max_drawdown_pct", self.max_drawdown_pct)?;
        positive("max_daily_loss_pct", self.max_daily_loss_pct)?;
        if self.max_positions == 0 {
            return Err(RiskConfigError::OutOfRange {
                field: "max_positions",
                expected: ">= 1",
                value: 0.0,
            });
        }
        if !(self.min_account_balance >= 0.0) {
            return Err(RiskConfigError::OutOfRange {
                field: "min_account_balance",
                expected: ">= 0",
                value: self.min_account_balance,
            });
        }
        if self.use_trailing_stops
            && !(self.trailing_stop_pct > 0.0 && self.trailing_stop_pct < 100.0)
        {
            return Err(RiskConfigError::OutOfRange {
                field: "trailing_stop_pct",
                expected: "in (0, 100)",
                value: self.trailing_stop_pct,
            });
        }
        if self.use_take_profits {
            self.validate_take_profits()?;
        }
        Ok(())
    }

    fn validate_take_profits(&self) -> Result<(), RiskConfigError> {
        let levels = &self.take_profit_levels;
        let increasing = levels.windows(2).all(|w| w[0] < w[1]);
        if !increasing || levels.iter().any(|l| !(*l > 0.0)) {
            return Err(RiskConfigError::UnorderedLevels);
        }
        if self.take_profit_sizes.len() > levels.len() {
            return Err(RiskConfigError::TooManySizes {
                sizes: self.take_profit_sizes.len(),
                levels: levels.len(),
            });
        }
        if let Some(bad) = self.take_profit_sizes.iter().find(|s| !(**s >= 0.0)) {
            return Err(RiskConfigError::OutOfRange {
                field: "take_profit_sizes",
                expected: ">= 0",
                value: *bad,
            });
        }
        let total: f64 = self.take_profit_sizes.iter().sum();
        if total > 100.0 + 1e-9 {
            return Err(RiskConfigError::SizesExceedTotal(total));
        }
        Ok(())
    }

    /// Percent of the opening quantity assigned to each take-profit level.
    ///
    /// Levels without an explicit size split what remains of 100% equally.
    pub fn take_profit_split(&self) -> Vec<f64> {
        let n = self.take_profit_levels.len();
        let given = &self.take_profit_sizes[..self.take_profit_sizes.len().min(n)];
        let unsized_levels = n - given.len();
        let remainder = (100.0 - given.iter().sum::<f64>()).max(0.0);
        let share = if unsized_levels > 0 {
            remainder / unsized_levels as f64
        } else {
            0.0
        };
        (0..n)
            .map(|i| given.get(i).copied().unwrap_or(share))
            .collect()
    }
}
