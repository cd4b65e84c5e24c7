//! Performance metrics: pure functions over a completed backtest.
//!
//! Every metric is a pure function: equity curve and/or closed positions in,
//! scalar out. Empty inputs produce zero-valued metrics, never errors.
//!
//! Percent-valued outputs (returns, drawdown, win rate, VaR) are in percent
//! units. Ratio outputs (Sharpe, Sortino, Calmar, Omega) are unitless.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use coinlab_core::domain::ClosedPosition;
use coinlab_core::result::EquityPoint;
use coinlab_core::BacktestResult;

/// Annualization factor for daily-return statistics.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

/// Tail share used for historical VaR.
pub const VAR_TAIL: f64 = 0.05;

const EPSILON: f64 = 1e-15;

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub break_even_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expected_payoff: f64,
    pub avg_win: f64,
    /// Magnitude of the average losing trade (positive).
    pub avg_loss: f64,
    pub largest_win: f64,
    /// Magnitude of the largest losing trade (positive).
    pub largest_loss: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub omega: f64,
    pub information_ratio: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub total_fees: f64,
}

impl PerformanceMetrics {
    /// Compute all metrics with a zero benchmark return.
    pub fn compute(result: &BacktestResult) -> Self {
        Self::compute_with_benchmark(result, 0.0)
    }

    /// Compute all metrics; `benchmark` is the per-day return the
    /// information ratio is measured against.
    pub fn compute_with_benchmark(result: &BacktestResult, benchmark: f64) -> Self {
        let total = total_return_pct(result.initial_capital, result.final_capital);
        let annualized = annualized_return_pct(total, result.start_time, result.end_time);
        let tally = TradeTally::from_closed(&result.closed_positions);
        let (max_dd, max_dd_pct) = max_drawdown(&result.equity_curve, result.initial_capital);
        let returns = daily_returns(&result.equity_curve);
        let (var_95, cvar_95) = value_at_risk(&returns);

        Self {
            total_return_pct: total,
            annualized_return_pct: annualized,
            total_trades: tally.total,
            winning_trades: tally.winning,
            losing_trades: tally.losing,
            break_even_trades: tally.break_even,
            win_rate: tally.win_rate,
            profit_factor: tally.profit_factor,
            expected_payoff: tally.expected_payoff,
            avg_win: tally.avg_win,
            avg_loss: tally.avg_loss,
            largest_win: tally.largest_win,
            largest_loss: tally.largest_loss,
            max_drawdown: max_dd,
            max_drawdown_pct: max_dd_pct,
            sharpe: sharpe_ratio(&returns),
            sortino: sortino_ratio(&returns),
            calmar: calmar_ratio(annualized, max_dd_pct),
            omega: omega_ratio(&returns),
            information_ratio: information_ratio(&returns, benchmark),
            var_95,
            cvar_95,
            total_fees: result.total_fees(),
        }
    }
}

// ─── Returns ────────────────────────────────────────────────────────

/// `(final - initial) / initial * 100`. Zero when initial is not positive.
pub fn total_return_pct(initial: f64, final_capital: f64) -> f64 {
    if initial <= 0.0 {
        return 0.0;
    }
    (final_capital - initial) / initial * 100.0
}

/// `((1 + total/100)^(1/years) - 1) * 100` with `years = hours / (24*365)`.
///
/// Zero for an empty or inverted window. A total loss of 100% or more
/// annualizes to -100.
pub fn annualized_return_pct(total_pct: f64, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let hours = (end - start).num_seconds() as f64 / 3600.0;
    let years = hours / HOURS_PER_YEAR;
    if years <= 0.0 {
        return 0.0;
    }
    let growth = 1.0 + total_pct / 100.0;
    if growth <= 0.0 {
        return -100.0;
    }
    (growth.powf(1.0 / years) - 1.0) * 100.0
}

// ─── Trade tally ────────────────────────────────────────────────────

/// Win/loss statistics over closed positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeTally {
    pub total: usize,
    pub winning: usize,
    pub losing: usize,
    pub break_even: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expected_payoff: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

impl TradeTally {
    pub fn from_closed(closed: &[ClosedPosition]) -> Self {
        if closed.is_empty() {
            return Self::default();
        }

        let mut tally = Self {
            total: closed.len(),
            ..Self::default()
        };
        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;
        for c in closed {
            let pnl = c.profit_loss;
            if pnl > 0.0 {
                tally.winning += 1;
                gross_win += pnl;
                tally.largest_win = tally.largest_win.max(pnl);
            } else if pnl < 0.0 {
                tally.losing += 1;
                gross_loss += pnl.abs();
                tally.largest_loss = tally.largest_loss.max(pnl.abs());
            } else {
                tally.break_even += 1;
            }
        }

        tally.win_rate = tally.winning as f64 / tally.total as f64 * 100.0;
        tally.profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else {
            gross_win
        };
        tally.expected_payoff = (gross_win - gross_loss) / tally.total as f64;
        if tally.winning > 0 {
            tally.avg_win = gross_win / tally.winning as f64;
        }
        if tally.losing > 0 {
            tally.avg_loss = gross_loss / tally.losing as f64;
        }
        tally
    }
}

// ─── Drawdown ───────────────────────────────────────────────────────

/// Largest drop below the running high-water mark, as `(absolute, percent)`.
///
/// The high-water mark starts at `initial_capital`, matching the drawdown
/// curve the kernel records.
pub fn max_drawdown(curve: &[EquityPoint], initial_capital: f64) -> (f64, f64) {
    let mut high_water = initial_capital;
    let mut max_abs = 0.0_f64;
    let mut max_pct = 0.0_f64;
    for point in curve {
        if point.equity > high_water {
            high_water = point.equity;
        }
        let drop = high_water - point.equity;
        max_abs = max_abs.max(drop);
        if high_water > 0.0 {
            max_pct = max_pct.max(drop / high_water * 100.0);
        }
    }
    (max_abs, max_pct)
}

// ─── Per-interval returns ───────────────────────────────────────────

/// Last equity value of each UTC day, in date order.
pub fn daily_closes(curve: &[EquityPoint]) -> BTreeMap<NaiveDate, f64> {
    let mut closes = BTreeMap::new();
    for point in curve {
        closes.insert(point.t.date_naive(), point.equity);
    }
    closes
}

/// Simple returns between consecutive daily closes.
///
/// A day whose predecessor closed at or below zero is skipped.
pub fn daily_returns(curve: &[EquityPoint]) -> Vec<f64> {
    let closes: Vec<f64> = daily_closes(curve).into_values().collect();
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Month-over-month returns in percent, keyed `YYYY-MM`.
///
/// Each month takes the last equity value observed in it. The first month
/// is measured against `initial_capital`.
pub fn monthly_returns(curve: &[EquityPoint], initial_capital: f64) -> BTreeMap<String, f64> {
    let mut closes: BTreeMap<String, f64> = BTreeMap::new();
    for point in curve {
        closes.insert(point.t.format("%Y-%m").to_string(), point.equity);
    }

    let mut previous = initial_capital;
    let mut returns = BTreeMap::new();
    for (month, equity) in closes {
        let r = if previous > 0.0 {
            (equity - previous) / previous * 100.0
        } else {
            0.0
        };
        returns.insert(month, r);
        previous = equity;
    }
    returns
}

// ─── Risk-adjusted ratios ───────────────────────────────────────────

/// Annualized Sharpe ratio, risk-free rate 0.
///
/// `mean(r) / std(r) * sqrt(252)`. Zero with fewer than 2 returns or no
/// variance.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < EPSILON {
        return 0.0;
    }
    mean_f64(returns) / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio.
///
/// `mean(r) / sqrt(mean(min(r, 0)^2)) * sqrt(252)`. Zero without downside.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside = downside_deviation(returns);
    if downside < EPSILON {
        return 0.0;
    }
    mean_f64(returns) / downside * TRADING_DAYS_PER_YEAR.sqrt()
}

/// `annualized_return_pct / max_drawdown_pct`. Zero without drawdown.
pub fn calmar_ratio(annualized_pct: f64, max_drawdown_pct: f64) -> f64 {
    if max_drawdown_pct < EPSILON {
        return 0.0;
    }
    annualized_pct / max_drawdown_pct
}

/// `Σ max(r, 0) / Σ max(-r, 0)`.
///
/// Falls back to the gain sum when there are no losing days, like the
/// profit factor.
pub fn omega_ratio(returns: &[f64]) -> f64 {
    let gains: f64 = returns.iter().map(|r| r.max(0.0)).sum();
    let losses: f64 = returns.iter().map(|r| (-r).max(0.0)).sum();
    if losses < EPSILON {
        return gains;
    }
    gains / losses
}

/// `(mean(r) - benchmark) / std(r) * sqrt(252)`.
pub fn information_ratio(returns: &[f64], benchmark: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < EPSILON {
        return 0.0;
    }
    (mean_f64(returns) - benchmark) / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Historical 95% VaR and CVaR, both as positive loss percentages.
///
/// Returns are sorted ascending and VaR is `-r[floor(0.05 n)] * 100`. CVaR
/// is the mean of the returns strictly below that index; when the tail is
/// empty it equals VaR.
pub fn value_at_risk(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let index = (VAR_TAIL * sorted.len() as f64).floor() as usize;
    let var = -sorted[index] * 100.0;
    let tail = &sorted[..index];
    let cvar = if tail.is_empty() {
        var
    } else {
        -mean_f64(tail) * 100.0
    };
    (var, cvar)
}

// ─── Helpers ────────────────────────────────────────────────────────

pub fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1), via Welford accumulation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mut count = 0.0;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for &x in values {
        count += 1.0;
        let delta = x - mean;
        mean += delta / count;
        m2 += delta * (x - mean);
    }
    (m2 / (count - 1.0)).sqrt()
}

/// `sqrt(mean(min(r, 0)^2))` over all returns.
pub fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sq: f64 = returns.iter().map(|r| r.min(0.0).powi(2)).sum();
    (sq / returns.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use coinlab_core::domain::{PositionId, Side};

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                t: day(i as i64),
                equity,
            })
            .collect()
    }

    fn closed(pnl: f64) -> ClosedPosition {
        ClosedPosition {
            id: PositionId(1),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: 1.0,
            entry_price: 100.0,
            open_time: day(0),
            exit_price: 100.0 + pnl,
            close_time: day(1),
            profit_loss: pnl,
            profit_loss_pct: pnl,
            exit_reason: "signal".into(),
        }
    }

    #[test]
    fn total_return_basic() {
        assert!((total_return_pct(10_000.0, 11_000.0) - 10.0).abs() < 1e-10);
        assert_eq!(total_return_pct(0.0, 11_000.0), 0.0);
    }

    #[test]
    fn annualized_return_one_year_equals_total() {
        let start = day(0);
        let end = start + Duration::hours(24 * 365);
        assert!((annualized_return_pct(10.0, start, end) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn annualized_return_empty_window_is_zero() {
        assert_eq!(annualized_return_pct(10.0, day(3), day(3)), 0.0);
        assert_eq!(annualized_return_pct(10.0, day(3), day(1)), 0.0);
    }

    #[test]
    fn annualized_return_total_loss() {
        let end = day(0) + Duration::hours(24 * 365 * 2);
        assert_eq!(annualized_return_pct(-100.0, day(0), end), -100.0);
    }

    #[test]
    fn tally_counts_and_ratios() {
        let trades = [closed(100.0), closed(-50.0), closed(0.0), closed(200.0)];
        let t = TradeTally::from_closed(&trades);
        assert_eq!(t.total, 4);
        assert_eq!((t.winning, t.losing, t.break_even), (2, 1, 1));
        assert_eq!(t.total, t.winning + t.losing + t.break_even);
        assert!((t.win_rate - 50.0).abs() < 1e-10);
        assert!((t.profit_factor - 6.0).abs() < 1e-10);
        assert!((t.expected_payoff - 62.5).abs() < 1e-10);
        assert!((t.avg_win - 150.0).abs() < 1e-10);
        assert!((t.avg_loss - 50.0).abs() < 1e-10);
        assert_eq!(t.largest_win, 200.0);
        assert_eq!(t.largest_loss, 50.0);
    }

    #[test]
    fn profit_factor_without_losses_falls_back_to_gross_win() {
        let t = TradeTally::from_closed(&[closed(30.0), closed(20.0)]);
        assert!((t.profit_factor - 50.0).abs() < 1e-10);
    }

    #[test]
    fn tally_empty_is_zero() {
        assert_eq!(TradeTally::from_closed(&[]), TradeTally::default());
    }

    #[test]
    fn max_drawdown_uses_initial_capital_as_first_peak() {
        let (abs, pct) = max_drawdown(&curve(&[90.0, 95.0, 120.0, 96.0, 130.0]), 100.0);
        assert!((abs - 24.0).abs() < 1e-10);
        assert!((pct - 20.0).abs() < 1e-10);
    }

    #[test]
    fn max_drawdown_empty() {
        assert_eq!(max_drawdown(&[], 100.0), (0.0, 0.0));
    }

    #[test]
    fn daily_returns_take_last_value_per_day() {
        let start = day(0);
        let points = vec![
            EquityPoint { t: start, equity: 100.0 },
            EquityPoint { t: start + Duration::hours(5), equity: 110.0 },
            EquityPoint { t: start + Duration::hours(25), equity: 121.0 },
        ];
        let r = daily_returns(&points);
        assert_eq!(r.len(), 1);
        assert!((r[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn monthly_returns_seed_from_initial_capital() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap();
        let points = vec![
            EquityPoint { t: jan - Duration::days(10), equity: 1_010.0 },
            EquityPoint { t: jan, equity: 1_100.0 },
            EquityPoint { t: feb, equity: 990.0 },
        ];
        let m = monthly_returns(&points, 1_000.0);
        assert_eq!(m.len(), 2);
        assert!((m["2024-01"] - 10.0).abs() < 1e-10);
        assert!((m["2024-02"] + 10.0).abs() < 1e-10);
    }

    #[test]
    fn sharpe_zero_for_flat_returns() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01]), 0.0);
        assert_eq!(sharpe_ratio(&[0.01]), 0.0);
    }

    #[test]
    fn sharpe_and_information_ratio_agree_at_zero_benchmark() {
        let r = [0.01, -0.005, 0.02, 0.003];
        assert!(sharpe_ratio(&r) > 0.0);
        assert!((sharpe_ratio(&r) - information_ratio(&r, 0.0)).abs() < 1e-12);
        assert!(information_ratio(&r, 0.01) < sharpe_ratio(&r));
    }

    #[test]
    fn sortino_uses_all_returns_in_downside_mean() {
        let r = [0.02, -0.01, 0.03, -0.02];
        let downside = ((0.0001 + 0.0004) / 4.0_f64).sqrt();
        let expected = mean_f64(&r) / downside * 252.0_f64.sqrt();
        assert!((sortino_ratio(&r) - expected).abs() < 1e-10);
        assert_eq!(sortino_ratio(&[0.01, 0.02]), 0.0);
    }

    #[test]
    fn calmar_divides_by_drawdown() {
        assert!((calmar_ratio(30.0, 15.0) - 2.0).abs() < 1e-12);
        assert_eq!(calmar_ratio(30.0, 0.0), 0.0);
    }

    #[test]
    fn omega_ratio_gain_over_loss() {
        assert!((omega_ratio(&[0.02, -0.01, 0.01, -0.01]) - 1.5).abs() < 1e-12);
        assert!((omega_ratio(&[0.02, 0.01]) - 0.03).abs() < 1e-12);
    }

    #[test]
    fn var_indexes_the_sorted_tail() {
        let returns: Vec<f64> = (0..40).map(|i| (i as f64 - 10.0) / 100.0).collect();
        // sorted[floor(0.05 * 40)] = sorted[2] = -0.08
        let (var, cvar) = value_at_risk(&returns);
        assert!((var - 8.0).abs() < 1e-10);
        // mean(-0.10, -0.09) = -0.095
        assert!((cvar - 9.5).abs() < 1e-10);
    }

    #[test]
    fn var_short_series_has_empty_tail() {
        let (var, cvar) = value_at_risk(&[0.01, -0.03, 0.02]);
        assert!((var - 3.0).abs() < 1e-10);
        assert_eq!(var, cvar);
        assert_eq!(value_at_risk(&[]), (0.0, 0.0));
    }

    #[test]
    fn std_dev_is_sample_deviation() {
        let s = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
    }
}
