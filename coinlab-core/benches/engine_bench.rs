//! Criterion benchmarks for coinlab hot paths.
//!
//! Benchmarks:
//! 1. Kernel event loop (full backtest with a moving-average strategy)
//! 2. Preprocessing (gap fill, outlier cap, resample)
//! 3. Event queue push/pop

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use coinlab_core::cancel::CancelToken;
use coinlab_core::costs::{FeeConfig, SlippageConfig};
use coinlab_core::data::preprocess::{cap_outliers, fill_gaps, resample};
use coinlab_core::data::{InMemoryDataLoader, LoaderOptions};
use coinlab_core::domain::{Candle, Interval, Side, Signal};
use coinlab_core::engine::{Engine, EngineConfig, EventKind, EventQueue};
use coinlab_core::risk::RiskParameters;
use coinlab_core::strategy::{StrategyConfig, StrategyFactory};

// ── Helpers ──────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

fn make_candles(symbol: &str, n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 10.0;
            Candle::new(
                symbol,
                Interval::H1,
                t0() + Duration::hours(i as i64),
                close - 0.3,
                close + 1.5,
                close - 1.5,
                close,
                1_000.0 + (i % 500) as f64,
            )
        })
        .collect()
}

fn engine_config(symbols: &[&str], hours: usize) -> EngineConfig {
    let mut cfg = EngineConfig::new(
        symbols.iter().map(|s| s.to_string()).collect(),
        Interval::H1,
        t0(),
        t0() + Duration::hours(hours as i64),
        100_000.0,
    );
    cfg.fees = FeeConfig::Fixed { rate: 0.001 };
    cfg.slippage = SlippageConfig::Variable {
        min_pct: 0.0,
        max_pct: 0.05,
        seed: 7,
    };
    cfg.risk = Some(RiskParameters {
        use_trailing_stops: true,
        ..RiskParameters::default()
    });
    cfg
}

// ── 1. Kernel ────────────────────────────────────────────────────────

fn bench_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel");
    for &hours in &[1_000usize, 10_000] {
        let symbols = ["BTCUSDT", "ETHUSDT"];
        let mut loader = InMemoryDataLoader::new(LoaderOptions::default());
        for s in symbols {
            loader.insert_candles(make_candles(s, hours));
        }
        let strategy_config = StrategyConfig::new("ma_crossover")
            .with("fast", 10i64)
            .with("slow", 50i64);

        group.bench_with_input(BenchmarkId::new("ma_crossover", hours), &hours, |b, &hours| {
            b.iter(|| {
                let cancel = CancelToken::new();
                let strategy = StrategyFactory::global()
                    .create("ma_crossover", Some(&strategy_config))
                    .unwrap();
                let engine = Engine::new(engine_config(&symbols, hours), &loader, strategy, &cancel).unwrap();
                black_box(engine.run(&cancel).unwrap())
            })
        });
    }
    group.finish();
}

// ── 2. Preprocessing ─────────────────────────────────────────────────

fn bench_preprocess(c: &mut Criterion) {
    let dense = make_candles("BTCUSDT", 10_000);
    let sparse: Vec<Candle> = dense
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 7 != 3)
        .map(|(_, c)| c.clone())
        .collect();

    c.bench_function("fill_gaps_10k", |b| {
        b.iter(|| fill_gaps(black_box(&sparse), Interval::H1))
    });
    c.bench_function("cap_outliers_10k", |b| {
        b.iter(|| {
            let mut candles = dense.clone();
            cap_outliers(black_box(&mut candles), 3.0)
        })
    });
    c.bench_function("resample_1h_to_4h_10k", |b| {
        b.iter(|| resample(black_box(&dense), Interval::H1, Interval::H4))
    });
}

// ── 3. Event queue ───────────────────────────────────────────────────

fn bench_queue(c: &mut Criterion) {
    c.bench_function("event_queue_push_pop_10k", |b| {
        b.iter(|| {
            let mut queue = EventQueue::new();
            for i in 0..10_000i64 {
                let at = t0() + Duration::minutes(i % 977);
                let signal = Signal::new("BTCUSDT", Side::Buy, 1.0, 100.0, at, "bench");
                queue.push(at, "BTCUSDT", EventKind::Signal(signal));
            }
            let mut n = 0;
            while let Some(e) = queue.pop() {
                n += black_box(e.seq) as usize & 1;
            }
            n
        })
    });
}

criterion_group!(benches, bench_kernel, bench_preprocess, bench_queue);
criterion_main!(benches);
