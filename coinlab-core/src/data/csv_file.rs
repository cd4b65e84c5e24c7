//! CSV candle files.
//!
//! Files are named `<SYMBOL>_<INTERVAL>.csv` and must carry the header
//! columns `timestamp, open, high, low, close, volume` (case-sensitive,
//! trimmed). Extra columns are ignored.

use super::dataset::DataQualityWarning;
use super::loader::LoadError;
use super::timestamp::parse_timestamp;
use crate::cancel::CancelToken;
use crate::domain::{Candle, Interval};
use chrono::{DateTime, Utc};
use std::io::Read;

pub const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Rows between cancellation checks.
const CANCEL_POLL_ROWS: usize = 4_096;

/// Parsed candles plus the diagnostics recorded along the way.
#[derive(Debug, Clone, Default)]
pub struct CsvCandles {
    pub candles: Vec<Candle>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Column positions resolved from the header row.
struct ColumnMap {
    indices: [usize; 6],
}

impl ColumnMap {
    fn resolve(headers: &csv::StringRecord, source_name: &str) -> Result<Self, LoadError> {
        let mut indices = [0usize; 6];
        for (slot, name) in indices.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| LoadError::SchemaMismatch {
                    source_name: source_name.to_string(),
                    column: name.to_string(),
                })?;
        }
        Ok(Self { indices })
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: usize) -> &'r str {
        record.get(self.indices[column]).unwrap_or("").trim()
    }
}

/// Read candles from any CSV byte stream.
///
/// Rows with an unparseable timestamp or one outside `[start, end]` are
/// skipped with a warning. An unparseable price or volume is fatal.
/// The result is sorted by open time with duplicate timestamps dropped.
#[allow(clippy::too_many_arguments)]
pub fn read_candles<R: Read>(
    reader: R,
    source_name: &str,
    symbol: &str,
    interval: Interval,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &CancelToken,
) -> Result<CsvCandles, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = ColumnMap::resolve(&headers, source_name)?;

    let mut out = CsvCandles::default();
    for (row, record) in rdr.records().enumerate() {
        if row % CANCEL_POLL_ROWS == 0 && cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(row as u64 + 2);

        let raw_ts = columns.get(&record, 0);
        let Some(open_time) = parse_timestamp(raw_ts) else {
            tracing::debug!(line, timestamp = raw_ts, "unparseable timestamp, row skipped");
            out.warnings.push(DataQualityWarning::SkippedRow {
                line,
                reason: format!("unparseable timestamp '{raw_ts}'"),
            });
            continue;
        };
        if open_time < start || open_time > end {
            out.warnings.push(DataQualityWarning::SkippedRow {
                line,
                reason: format!("timestamp {open_time} outside requested range"),
            });
            continue;
        }

        let mut values = [0.0f64; 5];
        for (i, value) in values.iter_mut().enumerate() {
            let raw = columns.get(&record, i + 1);
            *value = raw.parse::<f64>().map_err(|e| LoadError::Parse {
                source_name: source_name.to_string(),
                line,
                message: format!("{} '{raw}': {e}", REQUIRED_COLUMNS[i + 1]),
            })?;
        }
        let [open, high, low, close, volume] = values;

        let mut candle = Candle::new(symbol, interval, open_time, open, high, low, close, volume);
        if !candle.is_consistent() {
            candle.reclamp();
            out.warnings
                .push(DataQualityWarning::InconsistentOhlc { open_time });
        }
        out.candles.push(candle);
    }

    out.candles.sort_by_key(|c| c.open_time);
    let mut deduped: Vec<Candle> = Vec::with_capacity(out.candles.len());
    for candle in out.candles.drain(..) {
        if deduped.last().is_some_and(|prev| prev.open_time == candle.open_time) {
            out.warnings.push(DataQualityWarning::DuplicateTimestamp {
                open_time: candle.open_time,
            });
            continue;
        }
        deduped.push(candle);
    }
    out.candles = deduped;

    Ok(out)
}
