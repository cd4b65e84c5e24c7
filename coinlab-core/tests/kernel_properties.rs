//! Ledger and ordering invariants over random price paths and random
//! order flow.

use chrono::{DateTime, Duration, TimeZone, Utc};
use coinlab_core::cancel::CancelToken;
use coinlab_core::costs::{FeeConfig, SlippageConfig};
use coinlab_core::data::{InMemoryDataLoader, LoaderOptions};
use coinlab_core::domain::{Candle, Interval, Side, Signal};
use coinlab_core::engine::{Engine, EngineConfig};
use coinlab_core::strategy::{Strategy as BacktestStrategy, StrategyConfig, StrategyError};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// Replays one `(side, qty)` instruction per tick, skipping `None`.
struct Replay {
    steps: Vec<Option<(Side, f64)>>,
    tick: usize,
}

impl BacktestStrategy for Replay {
    fn name(&self) -> &str {
        "replay"
    }

    fn initialize(&mut self, _config: &StrategyConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_tick(
        &mut self,
        symbol: &str,
        at: DateTime<Utc>,
        candle: &Candle,
    ) -> Result<Vec<Signal>, StrategyError> {
        let step = self.steps.get(self.tick).copied().flatten();
        self.tick += 1;
        Ok(step
            .map(|(side, qty)| Signal::new(symbol, side, qty, candle.close, at, "replay"))
            .into_iter()
            .collect())
    }
}

fn arb_step() -> impl Strategy<Value = Option<(Side, f64)>> {
    prop_oneof![
        2 => Just(None),
        1 => (prop_oneof![Just(Side::Buy), Just(Side::Sell)], 0.1f64..5.0).prop_map(Some),
    ]
}

fn arb_case() -> impl Strategy<Value = (Vec<f64>, Vec<Option<(Side, f64)>>, bool, bool)> {
    (5usize..40).prop_flat_map(|n| {
        (
            prop::collection::vec(10.0f64..200.0, n),
            prop::collection::vec(arb_step(), n),
            any::<bool>(),
            any::<bool>(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_and_curves_stay_consistent(
        (closes, steps, allow_short, with_costs) in arb_case()
    ) {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::new("BTCUSDT", Interval::H1, t0() + Duration::hours(i as i64), *c, *c, *c, *c, 1.0))
            .collect();
        let mut loader = InMemoryDataLoader::new(LoaderOptions::default());
        loader.insert_candles(candles);

        let mut cfg = EngineConfig::new(
            vec!["BTCUSDT".into()],
            Interval::H1,
            t0(),
            t0() + Duration::days(5),
            1_000.0,
        );
        cfg.allow_short = allow_short;
        if with_costs {
            cfg.fees = FeeConfig::Fixed { rate: 0.001 };
            cfg.slippage = SlippageConfig::Variable { min_pct: 0.0, max_pct: 0.5, seed: 9 };
        }

        let cancel = CancelToken::new();
        let result = Engine::new(cfg, &loader, Box::new(Replay { steps, tick: 0 }), &cancel)
            .unwrap()
            .run(&cancel)
            .unwrap();

        // cash conservation
        let open_basis: f64 = result.positions.iter().map(|p| p.notional()).sum();
        let lhs = result.initial_capital + result.realized_pnl() - result.total_fees();
        prop_assert!((lhs - (result.final_cash + open_basis)).abs() < 1e-6,
            "lhs={lhs} cash={} basis={open_basis}", result.final_cash);

        // final equity marks open positions at the last close
        let last = *closes.last().unwrap();
        let marked: f64 = result.positions.iter().map(|p| p.mark_value(last)).sum();
        prop_assert!((result.final_capital - (result.final_cash + marked)).abs() < 1e-6);
        prop_assert!(result.final_cash >= -1e-6 || allow_short);

        // event ordering
        prop_assert!(result.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        // drawdown against the running high-water mark
        let mut high_water = result.initial_capital;
        for (e, d) in result.equity_curve.iter().zip(&result.drawdown_curve) {
            high_water = high_water.max(e.equity);
            let expected = ((high_water - e.equity) / high_water * 100.0).max(0.0);
            prop_assert!((d.drawdown - expected).abs() < 1e-9);
            prop_assert!(d.drawdown >= 0.0);
            prop_assert!(result.max_drawdown_pct() >= d.drawdown);
        }

        // order lifecycle: every trade is a terminal fill
        prop_assert!(result.trades.iter().all(|o| o.filled_at.is_some()));
    }
}
