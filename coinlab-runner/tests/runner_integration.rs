//! End-to-end runs: TOML config + CSV directory through the runner, the
//! batch runner, artifact export and the service facade.

use std::path::Path;

use chrono::{Duration, TimeZone, Utc};

use coinlab_core::costs::FeeConfig;
use coinlab_core::engine::EngineError;
use coinlab_core::strategy::{FactoryError, ParamValue, StrategyFactory};
use coinlab_core::CancelToken;
use coinlab_runner::export::{EQUITY_FILE, RESULT_FILE, TRADES_FILE};
use coinlab_runner::{
    load_artifacts, run_backtest, run_batch, save_artifacts, BacktestFile, BacktestRequest,
    BacktestService, RunError, ServiceDefaults,
};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn write_csv(dir: &Path, name: &str, closes: &[f64]) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut body = String::from("timestamp,open,high,low,close,volume\n");
    for (i, c) in closes.iter().enumerate() {
        let t = start + Duration::hours(i as i64);
        body.push_str(&format!("{},{c},{c},{c},{c},10\n", t.to_rfc3339()));
    }
    std::fs::write(dir.join(name), body).unwrap();
}

fn config_toml(dir: &Path, capital: f64, strategy: &str) -> String {
    format!(
        r#"
[backtest]
symbols = ["BTCUSDT"]
interval = "1h"
start = "2024-01-01"
end = "2024-01-02"
initial_capital = {capital:.1}

[data]
dir = "{dir}"

[strategy]
name = "{strategy}"
params = {{ quantity = 5.0 }}

[analysis]
monte_carlo_runs = 10
seed = 3
"#,
        dir = dir.display().to_string().replace('\\', "/"),
    )
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "BTCUSDT_1h.csv", &[100.0, 110.0, 121.0]);
    dir
}

// ──────────────────────────────────────────────
// Runner
// ──────────────────────────────────────────────

#[test]
fn buy_and_hold_from_toml() {
    let data = fixture();
    let file = BacktestFile::from_toml(&config_toml(data.path(), 1_000.0, "buy_and_hold")).unwrap();
    let outcome = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap();

    assert_eq!(outcome.run_id, file.run_id().unwrap());
    assert_eq!(outcome.result.final_capital, 1_105.0);
    assert_eq!(outcome.result.closed_positions.len(), 1);
    assert!(!outcome.result.cancelled);

    let m = &outcome.report.performance_metrics;
    assert!((m.total_return_pct - 10.5).abs() < 1e-9);
    assert_eq!(m.total_trades, 1);
    assert_eq!(m.winning_trades, 1);
    assert_eq!(m.win_rate, 100.0);
    assert_eq!(m.max_drawdown_pct, 0.0);

    let mc = outcome.report.monte_carlo.as_ref().unwrap();
    assert_eq!(mc.paths.len(), 10);
    assert!(mc.paths.iter().all(|p| p[0] == 1_000.0));
}

#[test]
fn outcome_json_has_result_and_metrics_at_top_level() {
    let data = fixture();
    let file = BacktestFile::from_toml(&config_toml(data.path(), 1_000.0, "buy_and_hold")).unwrap();
    let outcome = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap();

    let json: serde_json::Value = serde_json::to_value(&outcome).unwrap();
    for key in [
        "runId",
        "config",
        "startTime",
        "endTime",
        "initialCapital",
        "finalCapital",
        "trades",
        "positions",
        "closedPositions",
        "equityCurve",
        "drawdownCurve",
        "events",
        "performanceMetrics",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
}

#[test]
fn missing_data_file_is_an_engine_load_error() {
    let empty = tempfile::tempdir().unwrap();
    let file = BacktestFile::from_toml(&config_toml(empty.path(), 1_000.0, "buy_and_hold")).unwrap();
    let err = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, RunError::Engine(EngineError::Load { .. })));
}

#[test]
fn unknown_strategy_is_a_factory_error() {
    let data = fixture();
    let file = BacktestFile::from_toml(&config_toml(data.path(), 1_000.0, "martingale")).unwrap();
    let err = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap_err();
    assert!(matches!(
        err,
        RunError::Factory(FactoryError::UnknownStrategy(name)) if name == "martingale"
    ));
}

#[test]
fn batch_results_keep_input_order() {
    let data = fixture();
    let files: Vec<BacktestFile> = [1_000.0, 2_000.0, 3_000.0]
        .iter()
        .map(|&c| BacktestFile::from_toml(&config_toml(data.path(), c, "buy_and_hold")).unwrap())
        .collect();
    let outcomes = run_batch(&files, StrategyFactory::global(), &CancelToken::new());

    assert_eq!(outcomes.len(), 3);
    for (outcome, file) in outcomes.iter().zip(&files) {
        let outcome = outcome.as_ref().unwrap();
        assert_eq!(outcome.result.initial_capital, file.backtest.initial_capital);
        assert_eq!(
            outcome.result.final_capital,
            file.backtest.initial_capital + 105.0
        );
    }
}

#[test]
fn benchmark_symbol_adds_regimes() {
    let data = fixture();
    let mut file = BacktestFile::from_toml(&config_toml(data.path(), 1_000.0, "buy_and_hold")).unwrap();
    file.analysis.benchmark_symbol = Some("BTCUSDT".into());
    let outcome = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap();
    let regimes = outcome.report.regimes.unwrap();
    // One shared month: too few points for a correlation.
    assert_eq!(regimes.correlation, 0.0);
    assert_eq!(regimes.returns.bull.len(), 1);
}

// ──────────────────────────────────────────────
// Export
// ──────────────────────────────────────────────

#[test]
fn artifacts_round_trip() {
    let data = fixture();
    let out = tempfile::tempdir().unwrap();
    let file = BacktestFile::from_toml(&config_toml(data.path(), 1_000.0, "buy_and_hold")).unwrap();
    let outcome = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap();

    let run_dir = save_artifacts(&outcome, out.path()).unwrap();
    for name in [RESULT_FILE, EQUITY_FILE, TRADES_FILE] {
        assert!(run_dir.join(name).is_file(), "missing {name}");
    }

    let equity = std::fs::read_to_string(run_dir.join(EQUITY_FILE)).unwrap();
    assert_eq!(equity.lines().count(), 1 + outcome.result.equity_curve.len());
    let trades = std::fs::read_to_string(run_dir.join(TRADES_FILE)).unwrap();
    assert_eq!(trades.lines().count(), 2);

    let loaded = load_artifacts(&run_dir).unwrap();
    assert_eq!(loaded.run_id, outcome.run_id);
    assert_eq!(loaded.result.final_capital, outcome.result.final_capital);
    assert_eq!(loaded.result.events.len(), outcome.result.events.len());
    assert_eq!(
        loaded.report.performance_metrics.total_trades,
        outcome.report.performance_metrics.total_trades
    );
    assert_eq!(loaded.report.monte_carlo, outcome.report.monte_carlo);
}

#[test]
fn tiered_fee_artifacts_round_trip() {
    let data = fixture();
    let out = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"{}
[fees]
type = "TIERED"
tiers = [{{ min_volume = 0.0, maker_rate = 0.001, taker_rate = 0.002 }}]
"#,
        config_toml(data.path(), 1_000.0, "buy_and_hold")
    );
    let file = BacktestFile::from_toml(&toml).unwrap();
    let outcome = run_backtest(&file, StrategyFactory::global(), &CancelToken::new()).unwrap();
    assert!(outcome.report.performance_metrics.total_fees > 0.0);

    let run_dir = save_artifacts(&outcome, out.path()).unwrap();
    let json = std::fs::read_to_string(run_dir.join(RESULT_FILE)).unwrap();
    assert!(!json.contains("max_volume"));

    let loaded = load_artifacts(&run_dir).unwrap();
    assert_eq!(loaded.run_id, outcome.run_id);
    match &loaded.result.config.fees {
        FeeConfig::Tiered { tiers, .. } => {
            assert_eq!(tiers.len(), 1);
            assert_eq!(tiers[0].max_volume, None);
        }
        other => panic!("unexpected fees {other:?}"),
    }
}

#[test]
fn loading_a_missing_artifact_dir_is_io_error() {
    let out = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_artifacts(&out.path().join("nope")),
        Err(RunError::Io { .. })
    ));
}

// ──────────────────────────────────────────────
// Service
// ──────────────────────────────────────────────

#[test]
fn service_runs_and_stores_outcomes() {
    let data = fixture();
    let mut defaults = ServiceDefaults::default();
    defaults.data.dir = data.path().to_path_buf();
    let service = BacktestService::new(StrategyFactory::global(), defaults);

    let request = BacktestRequest {
        strategy: "buy_and_hold".into(),
        symbol: "BTCUSDT".into(),
        timeframe: "1h".into(),
        start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        initial_capital: 1_000.0,
        risk_per_trade: 0.0,
        params: [("quantity".to_string(), ParamValue::Float(5.0))]
            .into_iter()
            .collect(),
    };

    let outcome = service.run(&request, &CancelToken::new()).unwrap();
    assert_eq!(outcome.result.final_capital, 1_105.0);
    assert_eq!(service.get(&outcome.run_id).unwrap().run_id, outcome.run_id);

    // Same request, same id: the store does not grow.
    service.run(&request, &CancelToken::new()).unwrap();
    assert_eq!(service.list().len(), 1);

    let mut bigger = request.clone();
    bigger.initial_capital = 5_000.0;
    service.run(&bigger, &CancelToken::new()).unwrap();
    assert_eq!(service.list().len(), 2);
}

#[test]
fn service_failures_are_not_stored() {
    let data = tempfile::tempdir().unwrap();
    let mut defaults = ServiceDefaults::default();
    defaults.data.dir = data.path().to_path_buf();
    let service = BacktestService::new(StrategyFactory::global(), defaults);

    let request = BacktestRequest {
        strategy: "buy_and_hold".into(),
        symbol: "SOLUSDT".into(),
        timeframe: "1h".into(),
        start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        initial_capital: 1_000.0,
        risk_per_trade: 0.0,
        params: Default::default(),
    };
    assert!(service.run(&request, &CancelToken::new()).is_err());
    assert!(service.is_empty());
}
