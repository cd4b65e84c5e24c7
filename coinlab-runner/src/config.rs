//! TOML backtest configuration.
//!
//! A config file has one section per concern:
//!
//! ```toml
//! [backtest]
//! symbols = ["BTCUSDT"]
//! interval = "1h"
//! start = "2024-01-01"
//! end = "2024-03-31T23:00:00Z"
//! initial_capital = 10000.0
//!
//! [data]
//! dir = "data"
//! fill_missing = true
//!
//! [fees]
//! type = "FIXED"
//! rate = 0.001
//!
//! [strategy]
//! name = "ma_crossover"
//! params = { fast = 10, slow = 30 }
//! ```
//!
//! `[risk]` is optional; without it signal quantities pass through unsized.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use coinlab_core::costs::{FeeConfig, SlippageConfig};
use coinlab_core::data::{
    parse_timestamp, CsvDataLoader, DataLoader, LoaderOptions, TableDataLoader,
};
use coinlab_core::domain::Interval;
use coinlab_core::risk::RiskParameters;
use coinlab_core::strategy::StrategyConfig;
use coinlab_core::tracker::TrackerKind;
use coinlab_core::EngineConfig;

/// Content-addressed run identifier (BLAKE3 hex).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A complete, reproducible backtest description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestFile {
    pub backtest: BacktestSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub slippage: SlippageConfig,
    #[serde(default)]
    pub risk: Option<RiskParameters>,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub analysis: AnalysisSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub symbols: Vec<String>,
    pub interval: Interval,
    /// Any timestamp form the CSV loader accepts, including bare dates.
    #[serde(deserialize_with = "timestamp")]
    pub start: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp")]
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default)]
    pub tracker: TrackerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Csv,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub source: DataSource,
    #[serde(default)]
    pub table_path: Option<PathBuf>,
    #[serde(flatten)]
    pub options: LoaderOptions,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            source: DataSource::Csv,
            table_path: None,
            options: LoaderOptions::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Post-run analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Number of Monte-Carlo paths; 0 disables resampling.
    pub monte_carlo_runs: usize,
    pub seed: u64,
    /// Per-day benchmark return for the information ratio.
    pub benchmark_return: f64,
    /// Symbol whose monthly returns drive the regime breakdown.
    pub benchmark_symbol: Option<String>,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            monte_carlo_runs: 0,
            seed: 42,
            benchmark_return: 0.0,
            benchmark_symbol: None,
        }
    }
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{raw}'")))
}

impl BacktestFile {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: Self = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.strategy.name.trim().is_empty() {
            return Err(ConfigError::Invalid("strategy name is empty".into()));
        }
        let threshold = self.data.options.outlier_threshold;
        if self.data.options.detect_outliers && !(threshold.is_finite() && threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "outlier_threshold must be positive, got {threshold}"
            )));
        }
        if self.data.source == DataSource::Table && self.data.table_path.is_none() {
            return Err(ConfigError::Invalid(
                "data.table_path is required when data.source = \"table\"".into(),
            ));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let b = &self.backtest;
        let mut config = EngineConfig::new(
            b.symbols.clone(),
            b.interval,
            b.start,
            b.end,
            b.initial_capital,
        );
        config.allow_short = b.allow_short;
        config.tracker = b.tracker;
        config.fees = self.fees.clone();
        config.slippage = self.slippage.clone();
        config.risk = self.risk.clone();
        config
    }

    /// The strategy config to create with, or `None` to fall back to the
    /// factory's saved config when no params are given.
    pub fn strategy_config(&self) -> Option<&StrategyConfig> {
        (!self.strategy.params.is_empty()).then_some(&self.strategy)
    }

    pub fn loader(&self) -> Box<dyn DataLoader> {
        let options = self.data.options.clone();
        match (&self.data.source, &self.data.table_path) {
            (DataSource::Table, Some(path)) => Box::new(TableDataLoader::new(path, options)),
            _ => Box::new(CsvDataLoader::new(&self.data.dir, options)),
        }
    }

    /// BLAKE3 of the canonical (key-sorted) JSON form.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize config: {e}")))?;
        let hash = blake3::hash(value.to_string().as_bytes());
        Ok(hash.to_hex().to_string())
    }
}
