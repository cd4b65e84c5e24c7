//! Backtest service facade.
//!
//! Accepts the camelCase request a surrounding API sends, maps it onto a
//! [`BacktestFile`] using service-wide defaults, runs it, and keeps the
//! outcome in memory keyed by run id.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coinlab_core::costs::{FeeConfig, SlippageConfig};
use coinlab_core::domain::Interval;
use coinlab_core::risk::RiskParameters;
use coinlab_core::strategy::{ParamValue, StrategyConfig, StrategyFactory};
use coinlab_core::tracker::TrackerKind;
use coinlab_core::CancelToken;

use crate::config::{AnalysisSection, BacktestFile, BacktestSection, DataSection, RunId};
use crate::runner::{run_backtest, BacktestOutcome, RunError};

/// Incoming backtest request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub strategy: String,
    pub symbol: String,
    /// Interval code such as `1h`; unknown codes fall back to `1h`.
    pub timeframe: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub initial_capital: f64,
    /// Percent of capital risked per trade. Zero or less runs without a risk
    /// manager.
    #[serde(default)]
    pub risk_per_trade: f64,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// Settings every request inherits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefaults {
    pub data: DataSection,
    pub fees: FeeConfig,
    pub slippage: SlippageConfig,
    /// Template for requests that set `riskPerTrade`.
    pub risk: RiskParameters,
    pub analysis: AnalysisSection,
    pub allow_short: bool,
    pub tracker: TrackerKind,
}

/// Runs requests and stores their outcomes.
pub struct BacktestService<'f> {
    factory: &'f StrategyFactory,
    defaults: ServiceDefaults,
    results: RwLock<BTreeMap<RunId, Arc<BacktestOutcome>>>,
}

impl<'f> BacktestService<'f> {
    pub fn new(factory: &'f StrategyFactory, defaults: ServiceDefaults) -> Self {
        Self {
            factory,
            defaults,
            results: RwLock::new(BTreeMap::new()),
        }
    }

    /// The config a request runs with.
    pub fn backtest_file(&self, request: &BacktestRequest) -> BacktestFile {
        let d = &self.defaults;
        let risk = (request.risk_per_trade > 0.0).then(|| RiskParameters {
            max_risk_per_trade_pct: request.risk_per_trade,
            ..d.risk.clone()
        });
        BacktestFile {
            backtest: BacktestSection {
                symbols: vec![request.symbol.clone()],
                interval: Interval::parse_or_default(&request.timeframe),
                start: request.start_time,
                end: request.end_time,
                initial_capital: request.initial_capital,
                allow_short: d.allow_short,
                tracker: d.tracker,
            },
            data: d.data.clone(),
            fees: d.fees.clone(),
            slippage: d.slippage.clone(),
            risk,
            strategy: StrategyConfig {
                name: request.strategy.clone(),
                params: request.params.clone(),
            },
            analysis: d.analysis.clone(),
        }
    }

    /// Run a request and store its outcome. An identical request replaces
    /// the earlier outcome under the same id.
    pub fn run(
        &self,
        request: &BacktestRequest,
        cancel: &CancelToken,
    ) -> Result<Arc<BacktestOutcome>, RunError> {
        let file = self.backtest_file(request);
        let outcome = Arc::new(run_backtest(&file, self.factory, cancel)?);
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(outcome.run_id.clone(), Arc::clone(&outcome));
        Ok(outcome)
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<BacktestOutcome>> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    /// Stored outcomes in run-id order.
    pub fn list(&self) -> Vec<Arc<BacktestOutcome>> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request() -> BacktestRequest {
        BacktestRequest {
            strategy: "buy_and_hold".into(),
            symbol: "BTCUSDT".into(),
            timeframe: "4h".into(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            initial_capital: 10_000.0,
            risk_per_trade: 0.0,
            params: BTreeMap::new(),
        }
    }

    #[test]
    fn request_json_is_camel_case() {
        let json = r#"{
            "strategy": "ma_crossover",
            "symbol": "ETHUSDT",
            "timeframe": "1d",
            "startTime": "2024-01-01T00:00:00Z",
            "endTime": "2024-06-01T00:00:00Z",
            "initialCapital": 2500.0,
            "riskPerTrade": 1.5
        }"#;
        let req: BacktestRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.symbol, "ETHUSDT");
        assert_eq!(req.initial_capital, 2500.0);
        assert_eq!(req.risk_per_trade, 1.5);
        assert!(req.params.is_empty());
    }

    #[test]
    fn request_maps_onto_backtest_file() {
        let factory = StrategyFactory::with_builtins();
        let service = BacktestService::new(&factory, ServiceDefaults::default());

        let file = service.backtest_file(&request());
        assert_eq!(file.backtest.symbols, vec!["BTCUSDT"]);
        assert_eq!(file.backtest.interval, Interval::H4);
        assert!(file.risk.is_none());
        assert!(file.validate().is_ok());

        let mut risky = request();
        risky.risk_per_trade = 1.5;
        risky.timeframe = "7h".into();
        let file = service.backtest_file(&risky);
        assert_eq!(file.backtest.interval, Interval::H1);
        let risk = file.risk.unwrap();
        assert_eq!(risk.max_risk_per_trade_pct, 1.5);
        assert_eq!(risk.max_positions, RiskParameters::default().max_positions);
    }

    #[test]
    fn empty_store() {
        let factory = StrategyFactory::new();
        let service = BacktestService::new(&factory, ServiceDefaults::default());
        assert!(service.is_empty());
        assert!(service.get("missing").is_none());
        assert!(service.list().is_empty());
    }
}
