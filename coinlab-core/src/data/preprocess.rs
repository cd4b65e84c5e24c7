//! Candle preprocessing stages.
//!
//! Applied in order when enabled by `LoaderOptions`:
//! 1. Gap fill: interpolate candles missing from the interval grid
//! 2. Outlier cap: clamp per-column z-score outliers
//! 3. Resample: aggregate to a coarser interval

use super::dataset::DataQualityWarning;
use crate::domain::{Candle, Interval};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;

/// Fewer candles than this and outlier detection is skipped.
pub const MIN_OUTLIER_SAMPLE: usize = 4;

/// Preprocessing switches shared by every loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    pub fill_missing: bool,
    pub detect_outliers: bool,
    pub outlier_threshold: f64,
    pub resample_to: Option<Interval>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            fill_missing: false,
            detect_outliers: false,
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
            resample_to: None,
        }
    }
}

/// Output of the preprocessing pipeline.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub candles: Vec<Candle>,
    pub interval: Interval,
    pub warnings: Vec<DataQualityWarning>,
}

/// Run the enabled stages over time-sorted candles.
pub fn apply(candles: Vec<Candle>, interval: Interval, options: &LoaderOptions) -> Preprocessed {
    let mut warnings = Vec::new();

    let mut candles = if options.fill_missing {
        let (filled, w) = fill_gaps(&candles, interval);
        warnings.extend(w);
        filled
    } else {
        candles
    };

    if options.detect_outliers {
        warnings.extend(cap_outliers(&mut candles, options.outlier_threshold));
    }

    let mut interval = interval;
    if let Some(target) = options.resample_to {
        let (resampled, w) = resample(&candles, interval, target);
        let skipped = w
            .iter()
            .any(|w| matches!(w, DataQualityWarning::ResampleSkipped { .. }));
        if !skipped {
            interval = target;
        }
        warnings.extend(w);
        candles = resampled;
    }

    Preprocessed {
        candles,
        interval,
        warnings,
    }
}

// ─── Gap fill ────────────────────────────────────────────────────────

/// Insert interpolated candles on the interval grid between existing ones.
///
/// The grid is `first.open_time + k * interval`. Source candles that fall
/// between grid ticks are dropped. High, low, close and volume are linearly
/// interpolated between the last kept candle and the next real one; open is
/// the previous close.
pub fn fill_gaps(candles: &[Candle], interval: Interval) -> (Vec<Candle>, Vec<DataQualityWarning>) {
    let step = interval.duration();
    let step_ms = step.num_milliseconds();
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    let mut warnings = Vec::new();
    let Some(anchor) = candles.first().map(|c| c.open_time) else {
        return (out, warnings);
    };

    for next in candles {
        let offset = (next.open_time - anchor).num_milliseconds();
        if step_ms > 0 && offset % step_ms != 0 {
            tracing::debug!(open_time = %next.open_time, %interval, "off-grid candle dropped");
            warnings.push(DataQualityWarning::OffGrid {
                open_time: next.open_time,
            });
            continue;
        }
        loop {
            let Some(prev) = out.last() else { break };
            let t = prev.open_time + step;
            if t >= next.open_time {
                break;
            }
            let filled = interpolate(prev, next, t, interval);
            warnings.push(DataQualityWarning::GapFilled { open_time: t });
            out.push(filled);
        }
        out.push(next.clone());
    }

    (out, warnings)
}

fn interpolate(
    prev: &Candle,
    next: &Candle,
    t: chrono::DateTime<chrono::Utc>,
    interval: Interval,
) -> Candle {
    let span = (next.open_time - prev.open_time).num_milliseconds() as f64;
    let w = if span > 0.0 {
        (t - prev.open_time).num_milliseconds() as f64 / span
    } else {
        0.0
    };
    let lerp = |a: f64, b: f64| a + (b - a) * w;

    let mut candle = Candle::new(
        prev.symbol.clone(),
        interval,
        t,
        prev.close,
        lerp(prev.high, next.high),
        lerp(prev.low, next.low),
        lerp(prev.close, next.close),
        lerp(prev.volume, next.volume),
    );
    candle.reclamp();
    candle
}

// ─── Outliers ────────────────────────────────────────────────────────

/// Welford accumulator for population mean and variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        for v in values {
            stats.push(v);
        }
        stats
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn population_std(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2.max(0.0) / self.count as f64).sqrt()
    }

    /// Statistics of the same sample with one occurrence of `value` removed.
    pub fn without(&self, value: f64) -> Self {
        if self.count <= 1 {
            return Self::default();
        }
        let count = self.count - 1;
        let mean = (self.mean * self.count as f64 - value) / count as f64;
        let m2 = self.m2 - (value - self.mean) * (value - mean);
        Self {
            count,
            mean,
            m2: m2.max(0.0),
        }
    }
}

const FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

fn field(candle: &Candle, index: usize) -> f64 {
    match index {
        0 => candle.open,
        1 => candle.high,
        2 => candle.low,
        3 => candle.close,
        _ => candle.volume,
    }
}

fn set_field(candle: &mut Candle, index: usize, value: f64) {
    match index {
        0 => candle.open = value,
        1 => candle.high = value,
        2 => candle.low = value,
        3 => candle.close = value,
        _ => candle.volume = value,
    }
}

/// Cap per-column outliers to `mean ± threshold * std`.
///
/// Each value is scored against the population statistics of the other
/// values in its column. Scoring against statistics that include the value
/// itself bounds the z-score by `(n-1)/sqrt(n)`, which would hide a single
/// spike in a short window.
pub fn cap_outliers(candles: &mut [Candle], threshold: f64) -> Vec<DataQualityWarning> {
    let mut warnings = Vec::new();
    if candles.len() < MIN_OUTLIER_SAMPLE || threshold <= 0.0 {
        return warnings;
    }

    let stats: Vec<RunningStats> = (0..FIELDS.len())
        .map(|i| RunningStats::from_values(candles.iter().map(|c| field(c, i))))
        .collect();

    for candle in candles.iter_mut() {
        let mut touched = false;
        for (i, (name, column)) in FIELDS.iter().zip(&stats).enumerate() {
            let value = field(candle, i);
            let rest = column.without(value);
            let sigma = rest.population_std();
            if sigma <= 0.0 {
                continue;
            }
            let z = (value - rest.mean()) / sigma;
            if z.abs() <= threshold {
                continue;
            }
            let bound = rest.mean() + threshold * sigma * z.signum();
            let capped = bound.max(0.0);
            tracing::debug!(field = *name, original = value, capped, "outlier capped");
            warnings.push(DataQualityWarning::OutlierCapped {
                open_time: candle.open_time,
                field: (*name).to_string(),
                original: value,
                capped,
            });
            set_field(candle, i, capped);
            touched = true;
        }
        if touched {
            candle.reclamp();
        }
    }

    warnings
}

// ─── Resample ────────────────────────────────────────────────────────

/// Aggregate runs of `to / from` source candles into one candle each.
///
/// A finer target leaves the input unchanged and reports
/// `ResampleSkipped`. A trailing partial group is emitted as-is.
pub fn resample(
    candles: &[Candle],
    from: Interval,
    to: Interval,
) -> (Vec<Candle>, Vec<DataQualityWarning>) {
    if to.minutes() < from.minutes() {
        tracing::warn!(%from, %to, "resample target is finer than source, skipping");
        return (
            candles.to_vec(),
            vec![DataQualityWarning::ResampleSkipped { from, to }],
        );
    }

    let mut warnings = Vec::new();
    if to.minutes() % from.minutes() != 0 {
        warnings.push(DataQualityWarning::UnevenResample { from, to });
    }
    let ratio = (to.minutes() / from.minutes()).max(1) as usize;
    if ratio == 1 {
        return (candles.to_vec(), warnings);
    }

    let resampled = candles
        .chunks(ratio)
        .filter_map(|group| aggregate(group, to))
        .collect();
    (resampled, warnings)
}

fn aggregate(group: &[Candle], interval: Interval) -> Option<Candle> {
    let first = group.first()?;
    let last = group.last()?;
    Some(Candle {
        symbol: first.symbol.clone(),
        interval,
        open_time: first.open_time,
        close_time: last.close_time,
        open: first.open,
        high: group.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
        low: group.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
        close: last.close,
        volume: group.iter().map(|c| c.volume).sum(),
    })
}
