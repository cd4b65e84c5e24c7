//! Parquet-backed `candle` table.
//!
//! Columns: `symbol, interval, open_time, close_time, open, high, low,
//! close, volume, is_closed`. Times are stored as Unix milliseconds.
//! Queries select `symbol = ? AND interval = ? AND open_time BETWEEN ? AND ?`
//! ordered by `open_time` ascending.

use super::loader::LoadError;
use crate::domain::{Candle, Interval};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

pub const TABLE_COLUMNS: [&str; 10] = [
    "symbol",
    "interval",
    "open_time",
    "close_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "is_closed",
];

/// A single Parquet file holding candles for any number of symbols.
#[derive(Debug, Clone)]
pub struct CandleTable {
    path: PathBuf,
}

impl CandleTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the table contents with `candles`.
    ///
    /// Writes go to a `.tmp` sibling first and are renamed into place.
    pub fn write(&self, candles: &[Candle]) -> Result<(), LoadError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LoadError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut df = candles_to_dataframe(candles)?;
        let tmp = self.path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp).map_err(|e| LoadError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| LoadError::Table(format!("write parquet: {e}")))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            LoadError::Io {
                path: self.path.clone(),
                source: e,
            }
        })
    }

    /// Candles for one symbol and interval with `open_time` in `[start, end]`.
    pub fn query(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, LoadError> {
        if !self.path.exists() {
            return Err(LoadError::MissingFile {
                path: self.path.clone(),
            });
        }
        let file = fs::File::open(&self.path).map_err(|e| LoadError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| LoadError::Table(format!("read: {e}")))?;

        for name in TABLE_COLUMNS {
            if df.column(name).is_err() {
                return Err(LoadError::SchemaMismatch {
                    source_name: self.path.display().to_string(),
                    column: name.to_string(),
                });
            }
        }

        let mut candles = dataframe_to_candles(&df, |sym, iv, open_ms| {
            sym == symbol
                && iv == interval.as_str()
                && open_ms >= start.timestamp_millis()
                && open_ms <= end.timestamp_millis()
        })?;
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn candles_to_dataframe(candles: &[Candle]) -> Result<DataFrame, LoadError> {
    let symbols: Vec<String> = candles.iter().map(|c| c.symbol.clone()).collect();
    let intervals: Vec<String> = candles.iter().map(|c| c.interval.to_string()).collect();
    let open_times: Vec<i64> = candles.iter().map(|c| c.open_time.timestamp_millis()).collect();
    let close_times: Vec<i64> = candles
        .iter()
        .map(|c| c.close_time.timestamp_millis())
        .collect();
    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let closed: Vec<bool> = vec![true; candles.len()];

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("interval".into(), intervals),
        Column::new("open_time".into(), open_times),
        Column::new("close_time".into(), close_times),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("is_closed".into(), closed),
    ])
    .map_err(|e| LoadError::Table(format!("dataframe creation: {e}")))
}

fn dataframe_to_candles(
    df: &DataFrame,
    keep: impl Fn(&str, &str, i64) -> bool,
) -> Result<Vec<Candle>, LoadError> {
    let column_err = |name: &str, e: PolarsError| LoadError::Table(format!("{name} column: {e}"));
    let column = |name: &str| df.column(name).map_err(|e| column_err(name, e));

    let symbol_ca = column("symbol")?.str().map_err(|e| column_err("symbol", e))?;
    let interval_ca = column("interval")?
        .str()
        .map_err(|e| column_err("interval", e))?;
    let open_time_ca = column("open_time")?
        .i64()
        .map_err(|e| column_err("open_time", e))?;
    let close_time_ca = column("close_time")?
        .i64()
        .map_err(|e| column_err("close_time", e))?;
    let open_ca = column("open")?.f64().map_err(|e| column_err("open", e))?;
    let high_ca = column("high")?.f64().map_err(|e| column_err("high", e))?;
    let low_ca = column("low")?.f64().map_err(|e| column_err("low", e))?;
    let close_ca = column("close")?.f64().map_err(|e| column_err("close", e))?;
    let volume_ca = column("volume")?.f64().map_err(|e| column_err("volume", e))?;

    let mut candles = Vec::new();
    for i in 0..df.height() {
        let (Some(symbol), Some(raw_interval), Some(open_ms)) =
            (symbol_ca.get(i), interval_ca.get(i), open_time_ca.get(i))
        else {
            continue;
        };
        if !keep(symbol, raw_interval, open_ms) {
            continue;
        }
        let interval = Interval::parse_or_default(raw_interval);
        let open_time = DateTime::from_timestamp_millis(open_ms)
            .ok_or_else(|| LoadError::Table(format!("open_time out of range at row {i}")))?;
        let close_time = close_time_ca
            .get(i)
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(open_time + interval.duration());

        candles.push(Candle {
            symbol: symbol.to_string(),
            interval,
            open_time,
            close_time,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: volume_ca.get(i).unwrap_or(0.0),
        });
    }
    Ok(candles)
}
