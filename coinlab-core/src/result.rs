//! Equity and drawdown curves plus final result assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{DataQualityWarning, DataSet};
use crate::domain::{ClosedPosition, DatasetHash, Interval, Order, Position};
use crate::engine::{EngineConfig, EventRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub t: DateTime<Utc>,
    pub equity: f64,
}

/// Percentage below the running high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub t: DateTime<Utc>,
    pub drawdown: f64,
}

/// What a run loaded for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub symbol: String,
    pub interval: Interval,
    pub candles: usize,
    pub hash: DatasetHash,
    pub warnings: Vec<DataQualityWarning>,
}

impl From<&DataSet> for DatasetSummary {
    fn from(dataset: &DataSet) -> Self {
        Self {
            symbol: dataset.symbol.clone(),
            interval: dataset.interval,
            candles: dataset.len(),
            hash: dataset.fingerprint(),
            warnings: dataset.diagnostics.clone(),
        }
    }
}

/// Immutable outcome of one backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub config: EngineConfig,
    pub strategy: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub initial_capital: f64,
    /// Cash plus open positions marked at their last price.
    pub final_capital: f64,
    pub final_cash: f64,
    /// Filled orders in execution order.
    pub trades: Vec<Order>,
    /// Positions still open at the end.
    pub positions: Vec<Position>,
    pub closed_positions: Vec<ClosedPosition>,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub datasets: Vec<DatasetSummary>,
}

impl BacktestResult {
    pub fn total_fees(&self) -> f64 {
        self.trades.iter().map(|o| o.fee).sum()
    }

    /// Realized P&L before fees.
    pub fn realized_pnl(&self) -> f64 {
        self.closed_positions.iter().map(|c| c.profit_loss).sum()
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.drawdown_curve
            .iter()
            .map(|d| d.drawdown)
            .fold(0.0, f64::max)
    }
}

/// The run-level parts the kernel hands over at the end.
#[derive(Debug, Clone)]
pub struct ResultParts {
    pub config: EngineConfig,
    pub strategy: String,
    pub final_capital: f64,
    pub final_cash: f64,
    pub trades: Vec<Order>,
    pub positions: Vec<Position>,
    pub closed_positions: Vec<ClosedPosition>,
    pub events: Vec<EventRecord>,
    pub cancelled: bool,
    pub datasets: Vec<DatasetSummary>,
}

/// Streams equity points in and keeps the drawdown curve in step.
///
/// The high-water mark starts at initial capital.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    initial_capital: f64,
    high_water: f64,
    equity: Vec<EquityPoint>,
    drawdown: Vec<DrawdownPoint>,
}

impl ResultAggregator {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            high_water: initial_capital,
            equity: Vec::new(),
            drawdown: Vec::new(),
        }
    }

    pub fn record(&mut self, t: DateTime<Utc>, equity: f64) {
        if equity > self.high_water {
            self.high_water = equity;
        }
        let drawdown = if self.high_water > 0.0 {
            ((self.high_water - equity) / self.high_water * 100.0).max(0.0)
        } else {
            0.0
        };
        self.equity.push(EquityPoint { t, equity });
        self.drawdown.push(DrawdownPoint { t, drawdown });
    }

    pub fn high_water(&self) -> f64 {
        self.high_water
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity
    }

    pub fn finish(self, parts: ResultParts) -> BacktestResult {
        BacktestResult {
            start_time: parts.config.start,
            end_time: parts.config.end,
            initial_capital: self.initial_capital,
            config: parts.config,
            strategy: parts.strategy,
            final_capital: parts.final_capital,
            final_cash: parts.final_cash,
            trades: parts.trades,
            positions: parts.positions,
            closed_positions: parts.closed_positions,
            equity_curve: self.equity,
            drawdown_curve: self.drawdown,
            events: parts.events,
            cancelled: parts.cancelled,
            datasets: parts.datasets,
        }
    }
}
