//! Coinlab Runner: backtest orchestration, performance analysis, export.
//!
//! This crate builds on `coinlab-core` to provide:
//! - TOML run configuration with a content-addressed run id
//! - Single and parallel batch runners
//! - Performance metrics, trade statistics and monthly returns
//! - Monte-Carlo resampling of daily returns
//! - Regime breakdown against a benchmark
//! - An in-memory backtest service for request/response callers
//! - JSON and CSV artifact export

pub mod config;
pub mod export;
pub mod metrics;
pub mod monte_carlo;
pub mod regime;
pub mod report;
pub mod runner;
pub mod service;

pub use config::{AnalysisSection, BacktestFile, ConfigError, DataSection, DataSource, RunId};
pub use export::{load_artifacts, save_artifacts};
pub use metrics::{PerformanceMetrics, TradeTally};
pub use monte_carlo::{MonteCarloResult, MonteCarloSummary};
pub use regime::{Regime, RegimeReturns};
pub use report::{PerformanceReport, TradeStats};
pub use runner::{run_backtest, run_batch, BacktestOutcome, RunError};
pub use service::{BacktestRequest, BacktestService, ServiceDefaults};
