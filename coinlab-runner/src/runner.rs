//! Backtest runner: config in, analyzed outcome out.
//!
//! Two entry points:
//! - `run_backtest()`: one config, used by the CLI and the service
//! - `run_batch()`: many independent configs in parallel on rayon
//!
//! Each run owns its loader, kernel, tracker and risk manager; the strategy
//! factory is the only shared state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use coinlab_core::data::DataSet;
use coinlab_core::result::EquityPoint;
use coinlab_core::strategy::{FactoryError, StrategyFactory};
use coinlab_core::{BacktestResult, CancelToken, Engine, EngineError};

use crate::config::{BacktestFile, ConfigError, RunId};
use crate::metrics;
use crate::report::PerformanceReport;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("strategy error: {0}")]
    Factory(#[from] FactoryError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// A finished run: the kernel's result plus its analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestOutcome {
    pub run_id: RunId,
    #[serde(flatten)]
    pub result: BacktestResult,
    #[serde(flatten)]
    pub report: PerformanceReport,
}

/// Load, simulate and analyze one config.
pub fn run_backtest(
    file: &BacktestFile,
    factory: &StrategyFactory,
    cancel: &CancelToken,
) -> Result<BacktestOutcome, RunError> {
    file.validate()?;
    let run_id = file.run_id()?;
    info!(
        run_id = %run_id,
        strategy = %file.strategy.name,
        symbols = ?file.backtest.symbols,
        interval = %file.backtest.interval,
        "backtest started"
    );

    let loader = file.loader();
    let strategy = factory.create(&file.strategy.name, file.strategy_config())?;
    let engine = Engine::new(file.engine_config(), loader.as_ref(), strategy, cancel)?;
    let result = engine.run(cancel)?;

    let analysis = &file.analysis;
    let mut report = PerformanceReport::generate(&result, analysis.monte_carlo_runs, analysis.seed);
    if analysis.benchmark_return != 0.0 {
        report = report.with_benchmark_return(&result, analysis.benchmark_return);
    }
    if let Some(symbol) = &analysis.benchmark_symbol {
        match loader.load_data(
            symbol,
            file.backtest.interval,
            file.backtest.start,
            file.backtest.end,
            cancel,
        ) {
            Ok(dataset) => report = report.with_benchmark_months(&benchmark_monthly_returns(&dataset)),
            Err(e) => warn!(symbol = %symbol, error = %e, "benchmark unavailable, skipping regimes"),
        }
    }

    info!(
        run_id = %run_id,
        final_capital = result.final_capital,
        trades = result.trades.len(),
        total_return_pct = report.performance_metrics.total_return_pct,
        cancelled = result.cancelled,
        "backtest finished"
    );
    Ok(BacktestOutcome {
        run_id,
        result,
        report,
    })
}

/// Run independent configs in parallel. Results come back in input order.
pub fn run_batch(
    files: &[BacktestFile],
    factory: &StrategyFactory,
    cancel: &CancelToken,
) -> Vec<Result<BacktestOutcome, RunError>> {
    files
        .par_iter()
        .map(|file| run_backtest(file, factory, cancel))
        .collect()
}

/// Buy-and-hold monthly returns of a benchmark's closes, seeded by its
/// first close.
pub fn benchmark_monthly_returns(dataset: &DataSet) -> BTreeMap<String, f64> {
    let Some(first) = dataset.candles.first() else {
        return BTreeMap::new();
    };
    let curve: Vec<EquityPoint> = dataset
        .candles
        .iter()
        .map(|c| EquityPoint {
            t: c.open_time,
            equity: c.close,
        })
        .collect();
    metrics::monthly_returns(&curve, first.close)
}
