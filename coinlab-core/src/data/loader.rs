//! Data loaders: acquire a `DataSet` for one symbol and interval.
//!
//! Every loader runs the same preprocessing pipeline after reading raw
//! candles, so swapping the source never changes the cleaning rules.

use super::csv_file;
use super::dataset::DataSet;
use super::preprocess::{self, LoaderOptions};
use super::table::CandleTable;
use crate::cancel::CancelToken;
use crate::domain::{Candle, Interval, OrderBookSnapshot, Ticker};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Ingestion failures. All of them are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("data file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("{source_name}: missing required column '{column}'")]
    SchemaMismatch { source_name: String, column: String },

    #[error("{source_name}: line {line}: {message}")]
    Parse {
        source_name: String,
        line: u64,
        message: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("candle table error: {0}")]
    Table(String),

    #[error("load cancelled")]
    Cancelled,
}

/// A source of historical candles.
pub trait DataLoader: Send + Sync {
    /// Load, clean and (optionally) resample candles with open time in
    /// `[start, end]`.
    fn load_data(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<DataSet, LoadError>;

    fn name(&self) -> &str;
}

fn finish(
    symbol: &str,
    interval: Interval,
    candles: Vec<Candle>,
    mut diagnostics: Vec<super::DataQualityWarning>,
    options: &LoaderOptions,
) -> DataSet {
    let processed = preprocess::apply(candles, interval, options);
    diagnostics.extend(processed.warnings);
    let mut dataset = DataSet::new(symbol, processed.interval, processed.candles);
    dataset.diagnostics = diagnostics;
    tracing::info!(
        symbol,
        interval = %dataset.interval,
        candles = dataset.len(),
        warnings = dataset.diagnostics.len(),
        "dataset loaded"
    );
    dataset
}

// ─── CSV directory ───────────────────────────────────────────────────

/// Loads `<dir>/<SYMBOL>_<INTERVAL>.csv`.
#[derive(Debug, Clone)]
pub struct CsvDataLoader {
    data_dir: PathBuf,
    options: LoaderOptions,
}

impl CsvDataLoader {
    pub fn new(data_dir: impl Into<PathBuf>, options: LoaderOptions) -> Self {
        Self {
            data_dir: data_dir.into(),
            options,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.data_dir.join(format!("{symbol}_{interval}.csv"))
    }
}

impl DataLoader for CsvDataLoader {
    fn load_data(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<DataSet, LoadError> {
        let path = self.path_for(symbol, interval);
        if !path.exists() {
            return Err(LoadError::MissingFile { path });
        }
        let file = fs::File::open(&path).map_err(|e| LoadError::Io {
            path: path.clone(),
            source: e,
        })?;
        let source_name = path.display().to_string();
        let parsed = csv_file::read_candles(file, &source_name, symbol, interval, start, end, cancel)?;
        for warning in &parsed.warnings {
            tracing::debug!(symbol, %warning, "data quality");
        }
        Ok(finish(symbol, interval, parsed.candles, parsed.warnings, &self.options))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

// ─── Parquet table ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TableDataLoader {
    table: CandleTable,
    options: LoaderOptions,
}

impl TableDataLoader {
    pub fn new(table_path: impl Into<PathBuf>, options: LoaderOptions) -> Self {
        Self {
            table: CandleTable::new(table_path),
            options,
        }
    }

    pub fn table(&self) -> &CandleTable {
        &self.table
    }
}

impl DataLoader for TableDataLoader {
    fn load_data(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<DataSet, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let candles = self.table.query(symbol, interval, start, end)?;
        Ok(finish(symbol, interval, candles, Vec::new(), &self.options))
    }

    fn name(&self) -> &str {
        "table"
    }
}

// ─── In memory ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Series {
    candles: Vec<Candle>,
    tickers: BTreeMap<DateTime<Utc>, Ticker>,
    order_books: BTreeMap<DateTime<Utc>, OrderBookSnapshot>,
}

/// Preloaded candles and snapshots, keyed by `(symbol, interval)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataLoader {
    series: HashMap<(String, Interval), Series>,
    options: LoaderOptions,
}

impl InMemoryDataLoader {
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            series: HashMap::new(),
            options,
        }
    }

    /// Add candles; their symbol and interval pick the series.
    pub fn insert_candles(&mut self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.series
                .entry((candle.symbol.clone(), candle.interval))
                .or_default()
                .candles
                .push(candle);
        }
    }

    pub fn insert_ticker(&mut self, symbol: &str, interval: Interval, ticker: Ticker) {
        self.series
            .entry((symbol.to_string(), interval))
            .or_default()
            .tickers
            .insert(ticker.timestamp, ticker);
    }

    pub fn insert_order_book(&mut self, symbol: &str, interval: Interval, book: OrderBookSnapshot) {
        self.series
            .entry((symbol.to_string(), interval))
            .or_default()
            .order_books
            .insert(book.timestamp, book);
    }
}

impl DataLoader for InMemoryDataLoader {
    fn load_data(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<DataSet, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let Some(series) = self.series.get(&(symbol.to_string(), interval)) else {
            return Ok(DataSet::new(symbol, interval, Vec::new()));
        };
        let in_range = |t: &DateTime<Utc>| *t >= start && *t <= end;

        let mut candles: Vec<Candle> = series
            .candles
            .iter()
            .filter(|c| in_range(&c.open_time))
            .cloned()
            .collect();
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);

        let mut dataset = finish(symbol, interval, candles, Vec::new(), &self.options);
        dataset.tickers = series
            .tickers
            .range(start..=end)
            .map(|(t, v)| (*t, v.clone()))
            .collect();
        dataset.order_books = series
            .order_books
            .range(start..=end)
            .map(|(t, v)| (*t, v.clone()))
            .collect();
        Ok(dataset)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
