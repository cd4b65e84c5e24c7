//! Coinlab CLI: run backtests, inspect candle files, list strategies.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML config file and save artifacts
//! - `inspect`: load one `<SYMBOL>_<INTERVAL>.csv` and report what the
//!   loader made of it
//! - `strategies`: list the strategies registered in the factory

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coinlab_core::data::{parse_timestamp, CsvDataLoader, DataLoader, DataSet, LoaderOptions};
use coinlab_core::domain::Interval;
use coinlab_core::strategy::StrategyFactory;
use coinlab_core::CancelToken;
use coinlab_runner::{run_backtest, save_artifacts, BacktestFile, BacktestOutcome};

#[derive(Parser)]
#[command(name = "coinlab", about = "Coinlab CLI: event-driven crypto backtesting")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for result JSON and CSV files.
        #[arg(long, default_value = "results")]
        output: PathBuf,

        /// Monte-Carlo paths; overrides `[analysis] monte_carlo_runs`.
        #[arg(long)]
        monte_carlo: Option<usize>,
    },
    /// Load a candle file and print its summary and quality warnings.
    Inspect {
        /// Directory holding `<SYMBOL>_<INTERVAL>.csv` files.
        #[arg(long, default_value = "data")]
        dir: PathBuf,

        #[arg(long)]
        symbol: String,

        /// Interval code, e.g. 1h or 1d.
        #[arg(long, default_value = "1h")]
        interval: String,

        /// First open time to include. Defaults to the start of the file.
        #[arg(long)]
        start: Option<String>,

        /// Last open time to include. Defaults to the end of the file.
        #[arg(long)]
        end: Option<String>,

        /// Interpolate missing candles.
        #[arg(long, default_value_t = false)]
        fill: bool,

        /// Cap per-column z-score outliers.
        #[arg(long, default_value_t = false)]
        outliers: bool,

        /// Z-score threshold used with --outliers.
        #[arg(long, default_value_t = 3.0)]
        threshold: f64,
    },
    /// List registered strategies.
    Strategies,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Run {
            config,
            output,
            monte_carlo,
        } => run_cmd(config, output, monte_carlo),
        Commands::Inspect {
            dir,
            symbol,
            interval,
            start,
            end,
            fill,
            outliers,
            threshold,
        } => {
            let options = LoaderOptions {
                fill_missing: fill,
                detect_outliers: outliers,
                outlier_threshold: threshold,
                resample_to: None,
            };
            inspect_cmd(dir, &symbol, &interval, start, end, options)
        }
        Commands::Strategies => {
            for name in StrategyFactory::global().names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))
}

fn run_cmd(config_path: PathBuf, output: PathBuf, monte_carlo: Option<usize>) -> Result<()> {
    tracing::debug!(path = %config_path.display(), "loading config");
    let mut file = BacktestFile::from_file(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    if let Some(runs) = monte_carlo {
        file.analysis.monte_carlo_runs = runs;
    }

    let outcome = run_backtest(&file, StrategyFactory::global(), &CancelToken::new())
        .context("backtest failed")?;
    print_summary(&outcome);

    let run_dir = save_artifacts(&outcome, &output)
        .with_context(|| format!("failed to save artifacts under {}", output.display()))?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn inspect_cmd(
    dir: PathBuf,
    symbol: &str,
    interval: &str,
    start: Option<String>,
    end: Option<String>,
    options: LoaderOptions,
) -> Result<()> {
    let interval = Interval::parse_or_default(interval);
    let start = parse_bound(start.as_deref(), "start")?.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = parse_bound(end.as_deref(), "end")?.unwrap_or(DateTime::<Utc>::MAX_UTC);

    let loader = CsvDataLoader::new(&dir, options);
    let dataset = loader
        .load_data(symbol, interval, start, end, &CancelToken::new())
        .with_context(|| format!("failed to load {}", loader.path_for(symbol, interval).display()))?;
    print_dataset(&dataset);
    Ok(())
}

fn parse_bound(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(s).ok_or_else(|| anyhow!("unrecognized --{name} timestamp '{s}'")))
        .transpose()
}

fn print_dataset(dataset: &DataSet) {
    println!();
    println!("=== {} {} ===", dataset.symbol, dataset.interval);
    println!("Candles:        {}", dataset.len());
    if let (Some(first), Some(last)) = (dataset.candles.first(), dataset.candles.last()) {
        println!("First:          {}", first.open_time);
        println!("Last:           {}", last.open_time);
        let low = dataset.candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let high = dataset.candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        println!("Range:          {low:.2} .. {high:.2}");
        let volume: f64 = dataset.candles.iter().map(|c| c.volume).sum();
        println!("Volume:         {volume:.2}");
    }
    println!("Fingerprint:    {}", dataset.fingerprint());
    println!("Warnings:       {}", dataset.diagnostics.len());
    for warning in &dataset.diagnostics {
        println!("  {warning}");
    }
    println!();
}

fn print_summary(outcome: &BacktestOutcome) {
    let result = &outcome.result;
    let m = &outcome.report.performance_metrics;
    let stats = &outcome.report.trade_stats;

    println!();
    println!("=== Backtest Result ===");
    println!("Run:            {}", outcome.run_id);
    println!("Strategy:       {}", result.strategy);
    println!("Symbols:        {}", result.config.symbols.join(", "));
    println!("Period:         {} to {}", result.start_time, result.end_time);
    println!("Initial:        {:.2}", result.initial_capital);
    println!("Final:          {:.2}", result.final_capital);
    println!("Trades:         {} ({} fills)", m.total_trades, result.trades.len());
    if result.cancelled {
        println!("WARNING: run was cancelled, results are partial");
    }
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", m.total_return_pct);
    println!("Annualized:     {:.2}%", m.annualized_return_pct);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Sortino:        {:.3}", m.sortino);
    println!("Calmar:         {:.3}", m.calmar);
    println!("Omega:          {:.3}", m.omega);
    println!("Max Drawdown:   {:.2}% ({:.2})", m.max_drawdown_pct, m.max_drawdown);
    println!("Win Rate:       {:.1}%", m.win_rate);
    println!("Profit Factor:  {:.2}", m.profit_factor);
    println!("VaR 95:         {:.2}%", m.var_95);
    println!("CVaR 95:        {:.2}%", m.cvar_95);
    println!("Fees:           {:.2}", m.total_fees);
    println!("Max Consec Win: {}", stats.max_consecutive_wins);
    println!("Max Consec Loss:{}", stats.max_consecutive_losses);
    if let Some(mc) = &outcome.report.monte_carlo {
        println!();
        println!("--- Monte-Carlo ({} paths) ---", mc.runs);
        println!("Final p5:       {:.2}", mc.summary.p5);
        println!("Final p50:      {:.2}", mc.summary.p50);
        println!("Final p95:      {:.2}", mc.summary.p95);
        println!("P(loss):        {:.1}%", mc.summary.probability_of_loss);
    }
    for summary in &result.datasets {
        for warning in &summary.warnings {
            println!("WARNING: {} {warning}", summary.symbol);
        }
    }
    println!();
}
