//! Artifact export: JSON and CSV files for a finished run.
//!
//! - **JSON**: the full outcome (result, metrics, report sections)
//! - **CSV**: equity/drawdown curve and closed-trade tape for external tools

use std::path::{Path, PathBuf};

use coinlab_core::domain::ClosedPosition;
use coinlab_core::result::{DrawdownPoint, EquityPoint};

use crate::runner::{BacktestOutcome, RunError};

pub const RESULT_FILE: &str = "result.json";
pub const EQUITY_FILE: &str = "equity.csv";
pub const TRADES_FILE: &str = "trades.csv";

/// Length of the run-id prefix used as the artifact directory name.
const RUN_DIR_PREFIX: usize = 16;

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(outcome: &BacktestOutcome) -> Result<String, RunError> {
    Ok(serde_json::to_string_pretty(outcome)?)
}

pub fn import_json(json: &str) -> Result<BacktestOutcome, RunError> {
    Ok(serde_json::from_str(json)?)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: timestamp, equity, drawdown_pct. The curves are zipped by
/// position; the kernel records them in step.
pub fn export_equity_csv(
    equity: &[EquityPoint],
    drawdown: &[DrawdownPoint],
) -> Result<String, RunError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity", "drawdown_pct"])?;
    for (i, point) in equity.iter().enumerate() {
        let dd = drawdown.get(i).map_or(0.0, |d| d.drawdown);
        wtr.write_record([
            point.t.to_rfc3339(),
            format!("{:.2}", point.equity),
            format!("{:.4}", dd),
        ])?;
    }
    finish(wtr)
}

/// One row per closed position.
pub fn export_trades_csv(closed: &[ClosedPosition]) -> Result<String, RunError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "position_id",
        "symbol",
        "side",
        "quantity",
        "entry_price",
        "open_time",
        "exit_price",
        "close_time",
        "profit_loss",
        "profit_loss_pct",
        "exit_reason",
    ])?;
    for c in closed {
        wtr.write_record([
            c.id.0.to_string(),
            c.symbol.clone(),
            c.side.to_string(),
            format!("{:.8}", c.quantity),
            format!("{:.6}", c.entry_price),
            c.open_time.to_rfc3339(),
            format!("{:.6}", c.exit_price),
            c.close_time.to_rfc3339(),
            format!("{:.6}", c.profit_loss),
            format!("{:.4}", c.profit_loss_pct),
            c.exit_reason.clone(),
        ])?;
    }
    finish(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String, RunError> {
    let data = wtr
        .into_inner()
        .map_err(|e| RunError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `result.json`, `equity.csv` and `trades.csv` under
/// `{output_dir}/{run_id prefix}/` and return that directory.
///
/// The directory name is derived from the run id, so re-running an
/// identical config overwrites its artifacts.
pub fn save_artifacts(outcome: &BacktestOutcome, output_dir: &Path) -> Result<PathBuf, RunError> {
    let prefix: String = outcome.run_id.chars().take(RUN_DIR_PREFIX).collect();
    let run_dir = output_dir.join(prefix);
    std::fs::create_dir_all(&run_dir).map_err(|source| RunError::Io {
        path: run_dir.clone(),
        source,
    })?;

    let result = &outcome.result;
    write(&run_dir.join(RESULT_FILE), &export_json(outcome)?)?;
    write(
        &run_dir.join(EQUITY_FILE),
        &export_equity_csv(&result.equity_curve, &result.drawdown_curve)?,
    )?;
    write(
        &run_dir.join(TRADES_FILE),
        &export_trades_csv(&result.closed_positions)?,
    )?;
    Ok(run_dir)
}

pub fn load_artifacts(dir: &Path) -> Result<BacktestOutcome, RunError> {
    let path = dir.join(RESULT_FILE);
    let json = std::fs::read_to_string(&path).map_err(|source| RunError::Io { path, source })?;
    import_json(&json)
}

fn write(path: &Path, contents: &str) -> Result<(), RunError> {
    std::fs::write(path, contents).map_err(|source| RunError::Io {
        path: path.to_path_buf(),
        source,
    })
}
