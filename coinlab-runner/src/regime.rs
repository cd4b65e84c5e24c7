//! Market-regime breakdown of monthly returns.
//!
//! Months are labelled by the benchmark's return for that month and the
//! strategy's return is filed under the label. Only months present in both
//! series take part.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::mean_f64;

/// Benchmark monthly return above which a month is bullish, in percent.
pub const BULL_THRESHOLD_PCT: f64 = 1.0;

/// Benchmark monthly return below which a month is bearish, in percent.
pub const BEAR_THRESHOLD_PCT: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
}

impl Regime {
    pub fn classify(benchmark_return_pct: f64) -> Self {
        if benchmark_return_pct > BULL_THRESHOLD_PCT {
            Regime::Bull
        } else if benchmark_return_pct < BEAR_THRESHOLD_PCT {
            Regime::Bear
        } else {
            Regime::Sideways
        }
    }
}

/// Strategy monthly returns partitioned by benchmark regime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeReturns {
    pub bull: Vec<f64>,
    pub bear: Vec<f64>,
    pub sideways: Vec<f64>,
}

impl RegimeReturns {
    pub fn get(&self, regime: Regime) -> &[f64] {
        match regime {
            Regime::Bull => &self.bull,
            Regime::Bear => &self.bear,
            Regime::Sideways => &self.sideways,
        }
    }

    pub fn mean(&self, regime: Regime) -> f64 {
        mean_f64(self.get(regime))
    }

    fn push(&mut self, regime: Regime, value: f64) {
        match regime {
            Regime::Bull => self.bull.push(value),
            Regime::Bear => self.bear.push(value),
            Regime::Sideways => self.sideways.push(value),
        }
    }
}

pub fn analyze_regimes(
    strategy: &BTreeMap<String, f64>,
    benchmark: &BTreeMap<String, f64>,
) -> RegimeReturns {
    let mut out = RegimeReturns::default();
    for (month, &bench) in benchmark {
        if let Some(&ret) = strategy.get(month) {
            out.push(Regime::classify(bench), ret);
        }
    }
    out
}

/// Pearson correlation of strategy and benchmark returns on shared months.
///
/// Zero with fewer than two shared months or zero variance in either.
pub fn correlation(strategy: &BTreeMap<String, f64>, benchmark: &BTreeMap<String, f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = strategy
        .iter()
        .filter_map(|(month, &s)| benchmark.get(month).map(|&b| (s, b)))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }

    let n = pairs.len() as f64;
    let mean_s = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_s, mut var_b) = (0.0, 0.0, 0.0);
    for (s, b) in &pairs {
        cov += (s - mean_s) * (b - mean_b);
        var_s += (s - mean_s).powi(2);
        var_b += (b - mean_b).powi(2);
    }
    let denom = (var_s * var_b).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    cov / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn months(values: &[(&str, f64)]) -> BTreeMap<String, f64> {
        values.iter().map(|(m, v)| (m.to_string(), *v)).collect()
    }

    #[test]
    fn classify_thresholds_are_exclusive() {
        assert_eq!(Regime::classify(1.5), Regime::Bull);
        assert_eq!(Regime::classify(1.0), Regime::Sideways);
        assert_eq!(Regime::classify(-1.0), Regime::Sideways);
        assert_eq!(Regime::classify(-1.01), Regime::Bear);
    }

    #[test]
    fn partitions_shared_months() {
        let strategy = months(&[("2024-01", 4.0), ("2024-02", -2.0), ("2024-03", 0.5), ("2024-05", 9.0)]);
        let benchmark = months(&[("2024-01", 3.0), ("2024-02", -5.0), ("2024-03", 0.2), ("2024-04", 8.0)]);
        let r = analyze_regimes(&strategy, &benchmark);
        assert_eq!(r.bull, vec![4.0]);
        assert_eq!(r.bear, vec![-2.0]);
        assert_eq!(r.sideways, vec![0.5]);
        assert_eq!(r.mean(Regime::Bull), 4.0);
    }

    #[test]
    fn correlation_of_linear_series() {
        let strategy = months(&[("2024-01", 1.0), ("2024-02", 2.0), ("2024-03", 3.0)]);
        let benchmark = months(&[("2024-01", 2.0), ("2024-02", 4.0), ("2024-03", 6.0)]);
        assert!((correlation(&strategy, &benchmark) - 1.0).abs() < 1e-12);

        let inverse = months(&[("2024-01", -1.0), ("2024-02", -2.0), ("2024-03", -3.0)]);
        assert!((correlation(&strategy, &inverse) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_degenerate_cases() {
        let one = months(&[("2024-01", 1.0)]);
        assert_eq!(correlation(&one, &one), 0.0);

        let flat = months(&[("2024-01", 1.0), ("2024-02", 1.0)]);
        let moving = months(&[("2024-01", 1.0), ("2024-02", 3.0)]);
        assert_eq!(correlation(&flat, &moving), 0.0);
    }
}
