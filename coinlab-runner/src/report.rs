//! Performance report: metrics, trade statistics, monthly returns, and
//! optional Monte-Carlo and regime sections, bundled for one run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use coinlab_core::domain::ClosedPosition;
use coinlab_core::BacktestResult;

use crate::metrics::{self, PerformanceMetrics};
use crate::monte_carlo::{self, MonteCarloResult};
use crate::regime::{self, RegimeReturns};

/// Streaks, holding times and distribution figures not covered by
/// [`PerformanceMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_hours: f64,
    pub median_holding_hours: f64,
    pub avg_winner_holding_hours: f64,
    pub avg_loser_holding_hours: f64,
    pub profitable_months: usize,
    pub unprofitable_months: usize,
    pub best_month: Option<String>,
    pub best_month_return: f64,
    pub worst_month: Option<String>,
    pub worst_month_return: f64,
    pub daily_return_std: f64,
    pub downside_deviation: f64,
    pub var_95: f64,
    pub cvar_95: f64,
}

impl TradeStats {
    pub fn compute(
        closed: &[ClosedPosition],
        monthly: &BTreeMap<String, f64>,
        daily_returns: &[f64],
    ) -> Self {
        let (max_wins, max_losses) = streaks(closed);
        let holding: Vec<f64> = closed.iter().map(holding_hours).collect();
        let winners: Vec<f64> = closed
            .iter()
            .filter(|c| c.is_winner())
            .map(holding_hours)
            .collect();
        let losers: Vec<f64> = closed
            .iter()
            .filter(|c| c.is_loser())
            .map(holding_hours)
            .collect();

        let best = monthly
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(m, r)| (m.clone(), *r));
        let worst = monthly
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(m, r)| (m.clone(), *r));
        let (var_95, cvar_95) = metrics::value_at_risk(daily_returns);

        Self {
            max_consecutive_wins: max_wins,
            max_consecutive_losses: max_losses,
            avg_holding_hours: metrics::mean_f64(&holding),
            median_holding_hours: median(&holding),
            avg_winner_holding_hours: metrics::mean_f64(&winners),
            avg_loser_holding_hours: metrics::mean_f64(&losers),
            profitable_months: monthly.values().filter(|&&r| r > 0.0).count(),
            unprofitable_months: monthly.values().filter(|&&r| r < 0.0).count(),
            best_month_return: best.as_ref().map_or(0.0, |b| b.1),
            best_month: best.map(|b| b.0),
            worst_month_return: worst.as_ref().map_or(0.0, |w| w.1),
            worst_month: worst.map(|w| w.0),
            daily_return_std: metrics::std_dev(daily_returns),
            downside_deviation: metrics::downside_deviation(daily_returns),
            var_95,
            cvar_95,
        }
    }
}

fn holding_hours(c: &ClosedPosition) -> f64 {
    c.holding_period().num_seconds() as f64 / 3600.0
}

/// Longest runs of winners and losers, in close order. Break-even trades end
/// both runs.
fn streaks(closed: &[ClosedPosition]) -> (usize, usize) {
    let (mut wins, mut losses) = (0, 0);
    let (mut max_wins, mut max_losses) = (0, 0);
    for c in closed {
        if c.is_winner() {
            wins += 1;
            losses = 0;
        } else if c.is_loser() {
            losses += 1;
            wins = 0;
        } else {
            wins = 0;
            losses = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }
    (max_wins, max_losses)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Strategy returns by benchmark regime plus their correlation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeReport {
    pub returns: RegimeReturns,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub performance_metrics: PerformanceMetrics,
    pub trade_stats: TradeStats,
    pub monthly_returns: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monte_carlo: Option<MonteCarloResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regimes: Option<RegimeReport>,
}

impl PerformanceReport {
    /// Analyze `result`. `runs = 0` skips the Monte-Carlo section.
    pub fn generate(result: &BacktestResult, runs: usize, seed: u64) -> Self {
        let monthly = metrics::monthly_returns(&result.equity_curve, result.initial_capital);
        let daily = metrics::daily_returns(&result.equity_curve);
        let monte_carlo = (runs > 0).then(|| monte_carlo::simulate(result, runs, seed));

        Self {
            performance_metrics: PerformanceMetrics::compute(result),
            trade_stats: TradeStats::compute(&result.closed_positions, &monthly, &daily),
            monthly_returns: monthly,
            monte_carlo,
            regimes: None,
        }
    }

    /// Recompute the information ratio against a per-day benchmark return.
    pub fn with_benchmark_return(mut self, result: &BacktestResult, benchmark: f64) -> Self {
        let daily = metrics::daily_returns(&result.equity_curve);
        self.performance_metrics.information_ratio = metrics::information_ratio(&daily, benchmark);
        self
    }

    /// Attach a regime breakdown against benchmark monthly returns.
    pub fn with_benchmark_months(mut self, benchmark: &BTreeMap<String, f64>) -> Self {
        self.regimes = Some(RegimeReport {
            returns: regime::analyze_regimes(&self.monthly_returns, benchmark),
            correlation: regime::correlation(&self.monthly_returns, benchmark),
        });
        self
    }
}
