//! Fee models: the proportional rate charged on a fill's notional.
//!
//! - Zero: no fee
//! - Fixed: one flat rate
//! - Variable: `U(min_pct, max_pct) / 100`, seeded
//! - Tiered: maker/taker rates picked by trailing 30-day notional volume
//! - PerExchange: per-symbol overrides over a default rate

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::{check_range, check_rate, uniform, CostConfigError, TradeContext};
use crate::domain::Side;
use crate::rng::RngHierarchy;

/// Days of history in the tiered-fee volume window, including the trade day.
pub const TIER_WINDOW_DAYS: i64 = 30;

pub trait FeeModel: Send + Sync {
    /// Fraction of notional charged for this trade.
    fn fee_rate(&mut self, trade: &TradeContext<'_>) -> f64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroFee;

impl FeeModel for ZeroFee {
    fn fee_rate(&mut self, _trade: &TradeContext<'_>) -> f64 {
        0.0
    }

    fn name(&self) -> &str {
        "zero"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedFee {
    pub rate: f64,
}

impl FeeModel for FixedFee {
    fn fee_rate(&mut self, _trade: &TradeContext<'_>) -> f64 {
        self.rate
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[derive(Debug, Clone)]
pub struct VariableFee {
    min_pct: f64,
    max_pct: f64,
    rng: StdRng,
}

impl VariableFee {
    pub fn new(min_pct: f64, max_pct: f64, seed: u64) -> Self {
        Self {
            min_pct,
            max_pct,
            rng: RngHierarchy::new(seed).rng_for("fees", 0),
        }
    }
}

impl FeeModel for VariableFee {
    fn fee_rate(&mut self, _trade: &TradeContext<'_>) -> f64 {
        uniform(&mut self.rng, self.min_pct, self.max_pct) / 100.0
    }

    fn name(&self) -> &str {
        "variable"
    }
}

/// One volume bracket: applies when `min_volume <= vol < max_volume`.
/// A missing `max_volume` leaves the bracket open above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_volume: Option<f64>,
    pub maker_rate: f64,
    pub taker_rate: f64,
}

impl FeeTier {
    pub fn contains(&self, volume: f64) -> bool {
        self.min_volume <= volume && self.max_volume.map_or(true, |max| volume < max)
    }
}

/// Volume-tiered maker/taker fees.
#[derive(Debug, Clone)]
pub struct TieredFee {
    tiers: Vec<FeeTier>,
    buy_is_taker: bool,
    daily_volume: HashMap<String, BTreeMap<NaiveDate, f64>>,
}

impl TieredFee {
    pub fn new(tiers: Vec<FeeTier>, buy_is_taker: bool) -> Self {
        Self {
            tiers,
            buy_is_taker,
            daily_volume: HashMap::new(),
        }
    }

    /// Trailing-window notional for `symbol`, as of the last recorded trade.
    pub fn trailing_volume(&self, symbol: &str) -> f64 {
        self.daily_volume
            .get(symbol)
            .map(|days| days.values().sum())
            .unwrap_or(0.0)
    }

    fn record(&mut self, trade: &TradeContext<'_>) -> f64 {
        let day = trade.timestamp.date_naive();
        let window_start = day - Duration::days(TIER_WINDOW_DAYS - 1);
        let days = self.daily_volume.entry(trade.symbol.to_string()).or_default();
        *days.entry(day).or_insert(0.0) += (trade.quantity * trade.price).abs();
        days.retain(|d, _| *d >= window_start);
        days.range(window_start..=day).map(|(_, v)| v).sum()
    }

    fn tier_for(&self, volume: f64) -> Option<&FeeTier> {
        self.tiers
            .iter()
            .find(|t| t.contains(volume))
            .or_else(|| {
                self.tiers
                    .iter()
                    .filter(|t| t.min_volume <= volume)
                    .max_by(|a, b| a.min_volume.total_cmp(&b.min_volume))
            })
            .or_else(|| self.tiers.first())
    }
}

impl FeeModel for TieredFee {
    fn fee_rate(&mut self, trade: &TradeContext<'_>) -> f64 {
        let volume = self.record(trade);
        let Some(tier) = self.tier_for(volume) else {
            return 0.0;
        };
        let taker = match trade.side {
            Side::Buy => self.buy_is_taker,
            Side::Sell => !self.buy_is_taker,
        };
        if taker {
            tier.taker_rate
        } else {
            tier.maker_rate
        }
    }

    fn name(&self) -> &str {
        "tiered"
    }
}

/// Flat per-symbol rates with a default.
#[derive(Debug, Clone)]
pub struct PerExchangeFee {
    pub default_rate: f64,
    pub overrides: BTreeMap<String, f64>,
}

impl FeeModel for PerExchangeFee {
    fn fee_rate(&mut self, trade: &TradeContext<'_>) -> f64 {
        self.overrides
            .get(trade.symbol)
            .copied()
            .unwrap_or(self.default_rate)
    }

    fn name(&self) -> &str {
        "per_exchange"
    }
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Serializable fee selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeConfig {
    #[default]
    Zero,
    Fixed {
        rate: f64,
    },
    Variable {
        min_pct: f64,
        max_pct: f64,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    Tiered {
        tiers: Vec<FeeTier>,
        #[serde(default = "default_true")]
        buy_is_taker: bool,
    },
    PerExchange {
        default_rate: f64,
        #[serde(default)]
        overrides: BTreeMap<String, f64>,
    },
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), CostConfigError> {
        match self {
            FeeConfig::Zero => Ok(()),
            FeeConfig::Fixed { rate } => check_rate("fixed fee", *rate),
            FeeConfig::Variable {
                min_pct, max_pct, ..
            } => check_range("variable fee", *min_pct, *max_pct),
            FeeConfig::Tiered { tiers, .. } => {
                if tiers.is_empty() {
                    return Err(CostConfigError::Invalid {
                        model: "tiered fee",
                        message: "at least one tier is required".into(),
                    });
                }
                for tier in tiers {
                    let bad_max = tier.max_volume.is_some_and(|max| max <= tier.min_volume);
                    if tier.min_volume < 0.0 || bad_max {
                        return Err(CostConfigError::Invalid {
                            model: "tiered fee",
                            message: format!(
                                "tier bounds must satisfy 0 <= min < max, got [{}, {:?})",
                                tier.min_volume, tier.max_volume
                            ),
                        });
                    }
                    check_rate("tiered fee", tier.maker_rate)?;
                    check_rate("tiered fee", tier.taker_rate)?;
                }
                Ok(())
            }
            FeeConfig::PerExchange {
                default_rate,
                overrides,
            } => {
                check_rate("per-exchange fee", *default_rate)?;
                overrides
                    .values()
                    .try_for_each(|r| check_rate("per-exchange fee", *r))
            }
        }
    }

    pub fn build(&self) -> Box<dyn FeeModel> {
        match self {
            FeeConfig::Zero => Box::new(ZeroFee),
            FeeConfig::Fixed { rate } => Box::new(FixedFee { rate: *rate }),
            FeeConfig::Variable {
                min_pct,
                max_pct,
                seed,
            } => Box::new(VariableFee::new(*min_pct, *max_pct, *seed)),
            FeeConfig::Tiered {
                tiers,
                buy_is_taker,
            } => Box::new(TieredFee::new(tiers.clone(), *buy_is_taker)),
            FeeConfig::PerExchange {
                default_rate,
                overrides,
            } => Box::new(PerExchangeFee {
                default_rate: *default_rate,
                overrides: overrides.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn trade(symbol: &str, side: Side, qty: f64, price: f64, day: u32) -> TradeContext<'_> {
        TradeContext {
            symbol,
            side,
            quantity: qty,
            price,
            timestamp: at(day),
        }
    }

    fn tiers() -> Vec<FeeTier> {
        vec![
            FeeTier {
                min_volume: 0.0,
                max_volume: Some(10_000.0),
                maker_rate: 0.001,
                taker_rate: 0.002,
            },
            FeeTier {
                min_volume: 10_000.0,
                max_volume: None,
                maker_rate: 0.0005,
                taker_rate: 0.001,
            },
        ]
    }

    #[test]
    fn tiered_moves_up_with_volume_and_splits_maker_taker() {
        let mut fee = TieredFee::new(tiers(), true);
        assert_eq!(fee.fee_rate(&trade("BTC", Side::Buy, 1.0, 5_000.0, 1)), 0.002);
        assert_eq!(fee.fee_rate(&trade("BTC", Side::Sell, 1.0, 4_000.0, 1)), 0.001);
        // 9k + 2k crosses into the second tier
        assert_eq!(fee.fee_rate(&trade("BTC", Side::Buy, 1.0, 2_000.0, 2)), 0.001);
        assert_eq!(fee.fee_rate(&trade("BTC", Side::Sell, 0.1, 100.0, 2)), 0.0005);
        // other symbols keep their own window
        assert_eq!(fee.fee_rate(&trade("ETH", Side::Buy, 1.0, 1.0, 2)), 0.002);
    }

    #[test]
    fn tiered_window_expires_old_days() {
        let mut fee = TieredFee::new(tiers(), true);
        fee.fee_rate(&trade("BTC", Side::Buy, 1.0, 20_000.0, 1));
        assert!(fee.trailing_volume("BTC") >= 20_000.0);
        // 31 days later the first day has left the window
        let later = TradeContext {
            timestamp: at(1) + Duration::days(31),
            ..trade("BTC", Side::Buy, 1.0, 10.0, 1)
        };
        assert_eq!(fee.fee_rate(&later), 0.002);
        assert_eq!(fee.trailing_volume("BTC"), 10.0);
    }

    #[test]
    fn per_exchange_overrides() {
        let mut fee = PerExchangeFee {
            default_rate: 0.001,
            overrides: BTreeMap::from([("DOGEUSDT".to_string(), 0.0)]),
        };
        assert_eq!(fee.fee_rate(&trade("DOGEUSDT", Side::Buy, 1.0, 1.0, 1)), 0.0);
        assert_eq!(fee.fee_rate(&trade("BTCUSDT", Side::Buy, 1.0, 1.0, 1)), 0.001);
    }

    #[test]
    fn variable_fee_is_seeded() {
        let mut a = VariableFee::new(0.05, 0.1, 3);
        let mut b = VariableFee::new(0.05, 0.1, 3);
        let t = trade("BTC", Side::Buy, 1.0, 1.0, 1);
        for _ in 0..20 {
            let r = a.fee_rate(&t);
            assert_eq!(r, b.fee_rate(&t));
            assert!((0.0005..0.001).contains(&r));
        }
    }

    #[test]
    fn tiered_config_from_toml() {
        let text = r#"
type = "TIERED"

[[tiers]]
min_volume = 0.0
max_volume = 50000.0
maker_rate = 0.001
taker_rate = 0.001

[[tiers]]
min_volume = 50000.0
maker_rate = 0.0008
taker_rate = 0.0009
"#;
        let cfg: FeeConfig = toml::from_str(text).unwrap();
        cfg.validate().unwrap();
        match &cfg {
            FeeConfig::Tiered {
                tiers,
                buy_is_taker,
            } => {
                assert_eq!(tiers.len(), 2);
                assert_eq!(tiers[0].max_volume, Some(50_000.0));
                assert!(tiers[1].max_volume.is_none());
                assert!(*buy_is_taker);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cfg.build().name(), "tiered");
        assert!(FeeConfig::Tiered {
            tiers: vec![],
            buy_is_taker: true
        }
        .validate()
        .is_err());
    }

    #[test]
    fn open_top_tier_survives_json() {
        let cfg = FeeConfig::Tiered {
            tiers: tiers(),
            buy_is_taker: true,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("null"));
        let back: FeeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn inverted_tier_bounds_are_rejected() {
        let cfg = FeeConfig::Tiered {
            tiers: vec![FeeTier {
                min_volume: 5_000.0,
                max_volume: Some(1_000.0),
                maker_rate: 0.001,
                taker_rate: 0.001,
            }],
            buy_is_taker: true,
        };
        assert!(cfg.validate().is_err());
    }
}
