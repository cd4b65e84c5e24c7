//! Monte-Carlo resampling of daily returns.
//!
//! Each path is a random permutation of the observed daily returns,
//! compounded from initial capital. Path `i` draws its permutation from the
//! `"monte_carlo"` stream of a BLAKE3-seeded hierarchy, so paths can run in
//! parallel on rayon and still come out bit-identical for a given seed.

use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use coinlab_core::rng::RngHierarchy;
use coinlab_core::BacktestResult;

use crate::metrics::daily_returns;

const STREAM: &str = "monte_carlo";

/// Simulated equity paths plus a summary of their final values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub runs: usize,
    pub seed: u64,
    /// `runs` rows of `returns + 1` equity values, each starting at initial
    /// capital.
    pub paths: Vec<Vec<f64>>,
    pub summary: MonteCarloSummary,
}

/// Distribution of final equity across paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
    pub mean: f64,
    /// Share of paths ending below initial capital, in percent.
    pub probability_of_loss: f64,
}

impl MonteCarloSummary {
    pub fn from_paths(paths: &[Vec<f64>], initial_capital: f64) -> Self {
        let mut finals: Vec<f64> = paths.iter().filter_map(|p| p.last().copied()).collect();
        if finals.is_empty() {
            return Self::default();
        }
        finals.sort_by(f64::total_cmp);
        let n = finals.len() as f64;
        let losing = finals.iter().filter(|&&f| f < initial_capital).count();
        Self {
            p5: percentile_sorted(&finals, 5.0),
            p50: percentile_sorted(&finals, 50.0),
            p95: percentile_sorted(&finals, 95.0),
            mean: finals.iter().sum::<f64>() / n,
            probability_of_loss: losing as f64 / n * 100.0,
        }
    }
}

/// Resample the daily returns of `result` into `runs` paths.
pub fn simulate(result: &BacktestResult, runs: usize, seed: u64) -> MonteCarloResult {
    let returns = daily_returns(&result.equity_curve);
    let paths = simulate_paths(&returns, result.initial_capital, runs, seed);
    let summary = MonteCarloSummary::from_paths(&paths, result.initial_capital);
    MonteCarloResult {
        runs,
        seed,
        paths,
        summary,
    }
}

/// `runs` permutations of `returns`, each compounded from `initial_capital`.
///
/// Output is a `runs x (returns.len() + 1)` matrix in path order.
pub fn simulate_paths(returns: &[f64], initial_capital: f64, runs: usize, seed: u64) -> Vec<Vec<f64>> {
    let rngs = RngHierarchy::new(seed);
    (0..runs)
        .into_par_iter()
        .map(|i| {
            let mut shuffled = returns.to_vec();
            shuffled.shuffle(&mut rngs.rng_for(STREAM, i as u64));
            compound(initial_capital, &shuffled)
        })
        .collect()
}

fn compound(initial_capital: f64, returns: &[f64]) -> Vec<f64> {
    let mut path = Vec::with_capacity(returns.len() + 1);
    let mut equity = initial_capital;
    path.push(equity);
    for r in returns {
        equity *= 1.0 + r;
        path.push(equity);
    }
    path
}

/// Percentile of a sorted slice using linear interpolation.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}
