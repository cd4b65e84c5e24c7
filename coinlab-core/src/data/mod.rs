//! Historical data ingestion and preprocessing.
//!
//! - `loader`: the `DataLoader` trait and its CSV, Parquet and in-memory sources
//! - `csv_file`: CSV candle parsing with header validation
//! - `table`: Parquet `candle` table reader and writer
//! - `timestamp`: multi-format timestamp parsing
//! - `preprocess`: gap fill, outlier capping and resampling
//! - `dataset`: the `DataSet` bundle and data-quality warnings

pub mod csv_file;
pub mod dataset;
pub mod loader;
pub mod preprocess;
pub mod table;
pub mod timestamp;

pub use dataset::{DataQualityWarning, DataSet};
pub use loader::{CsvDataLoader, DataLoader, InMemoryDataLoader, LoadError, TableDataLoader};
pub use preprocess::LoaderOptions;
pub use table::CandleTable;
pub use timestamp::parse_timestamp;
