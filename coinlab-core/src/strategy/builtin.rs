//! Reference strategies.
//!
//! Both track their own holdings from order fills so that
//! `close_positions` can flatten whatever is still open, including
//! positions trimmed by risk-manager exits.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use super::{Strategy, StrategyConfig, StrategyError};
use crate::domain::{Candle, Order, OrderStatus, Side, Signal};
use crate::tracker::QTY_EPSILON;

// ─── Holdings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Holdings {
    qty: BTreeMap<String, f64>,
    last_price: BTreeMap<String, (f64, DateTime<Utc>)>,
}

impl Holdings {
    fn mark(&mut self, candle: &Candle, at: DateTime<Utc>) {
        self.last_price
            .insert(candle.symbol.clone(), (candle.close, at));
    }

    fn apply_fill(&mut self, order: &Order) {
        if order.status != OrderStatus::Filled {
            return;
        }
        let held = self.qty.entry(order.symbol.clone()).or_insert(0.0);
        *held += order.side.sign() * order.quantity;
        if held.abs() <= QTY_EPSILON {
            self.qty.remove(&order.symbol);
        }
    }

    fn held(&self, symbol: &str) -> f64 {
        self.qty.get(symbol).copied().unwrap_or(0.0)
    }

    fn flatten(&self, reason: &str) -> Vec<Signal> {
        self.qty
            .iter()
            .filter_map(|(symbol, qty)| {
                let (price, at) = self.last_price.get(symbol)?;
                let side = if *qty > 0.0 { Side::Sell } else { Side::Buy };
                Some(Signal::new(symbol.clone(), side, qty.abs(), *price, *at, reason))
            })
            .collect()
    }
}

// ─── Buy and hold ────────────────────────────────────────────────────

/// Buys on the first candle of each symbol and holds to the end.
///
/// Params: `quantity` (0 lets the risk manager size the entry).
#[derive(Debug, Clone, Default)]
pub struct BuyAndHold {
    quantity: f64,
    entered: BTreeMap<String, bool>,
    holdings: Holdings,
}

impl BuyAndHold {
    pub const NAME: &'static str = "buy_and_hold";
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), StrategyError> {
        let quantity = config.f64_or("quantity", 0.0)?;
        if !(quantity >= 0.0) {
            return Err(StrategyError::InvalidConfig {
                param: "quantity".into(),
                message: format!("must be >= 0, got {quantity}"),
            });
        }
        *self = Self {
            quantity,
            ..Self::default()
        };
        Ok(())
    }

    fn on_tick(
        &mut self,
        symbol: &str,
        at: DateTime<Utc>,
        candle: &Candle,
    ) -> Result<Vec<Signal>, StrategyError> {
        self.holdings.mark(candle, at);
        if self.entered.insert(symbol.to_string(), true).is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![
            Signal::buy(symbol, self.quantity, candle.close, at).with_reason("buy and hold entry"),
        ])
    }

    fn on_order_filled(&mut self, order: &Order) -> Result<(), StrategyError> {
        self.holdings.apply_fill(order);
        Ok(())
    }

    fn close_positions(&mut self) -> Result<Vec<Signal>, StrategyError> {
        Ok(self.holdings.flatten("end of backtest"))
    }
}

// ─── Moving-average crossover ────────────────────────────────────────

/// Long when the fast SMA crosses above the slow SMA, flat when it
/// crosses back below.
///
/// Params: `fast` (default 10), `slow` (default 30), `quantity`
/// (0 lets the risk manager size the entry).
#[derive(Debug, Clone)]
pub struct MaCrossover {
    fast: usize,
    slow: usize,
    quantity: f64,
    windows: BTreeMap<String, SymbolState>,
    holdings: Holdings,
}

#[derive(Debug, Clone, Default)]
struct SymbolState {
    closes: VecDeque<f64>,
    prev_diff: Option<f64>,
}

impl Default for MaCrossover {
    fn default() -> Self {
        Self {
            fast: 10,
            slow: 30,
            quantity: 0.0,
            windows: BTreeMap::new(),
            holdings: Holdings::default(),
        }
    }
}

impl MaCrossover {
    pub const NAME: &'static str = "ma_crossover";

    fn sma(closes: &VecDeque<f64>, period: usize) -> f64 {
        closes.iter().rev().take(period).sum::<f64>() / period as f64
    }
}

impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), StrategyError> {
        let fast = config.usize_or("fast", 10)?;
        let slow = config.usize_or("slow", 30)?;
        let quantity = config.f64_or("quantity", 0.0)?;
        if fast == 0 || fast >= slow {
            return Err(StrategyError::InvalidConfig {
                param: "fast".into(),
                message: format!("need 0 < fast < slow, got fast={fast} slow={slow}"),
            });
        }
        if !(quantity >= 0.0) {
            return Err(StrategyError::InvalidConfig {
                param: "quantity".into(),
                message: format!("must be >= 0, got {quantity}"),
            });
        }
        *self = Self {
            fast,
            slow,
            quantity,
            ..Self::default()
        };
        Ok(())
    }

    fn on_tick(
        &mut self,
        symbol: &str,
        at: DateTime<Utc>,
        candle: &Candle,
    ) -> Result<Vec<Signal>, StrategyError> {
        self.holdings.mark(candle, at);
        let state = self.windows.entry(symbol.to_string()).or_default();
        state.closes.push_back(candle.close);
        if state.closes.len() > self.slow {
            state.closes.pop_front();
        }
        if state.closes.len() < self.slow {
            return Ok(Vec::new());
        }

        let diff = Self::sma(&state.closes, self.fast) - Self::sma(&state.closes, self.slow);
        let prev = state.prev_diff.replace(diff);
        let held = self.holdings.held(symbol);

        let signal = match prev {
            Some(p) if p <= 0.0 && diff > 0.0 && held <= QTY_EPSILON => Some(
                Signal::buy(symbol, self.quantity, candle.close, at).with_reason("fast SMA crossed above slow"),
            ),
            Some(p) if p >= 0.0 && diff < 0.0 && held > QTY_EPSILON => Some(
                Signal::sell(symbol, held, candle.close, at).with_reason("fast SMA crossed below slow"),
            ),
            _ => None,
        };
        Ok(signal.into_iter().collect())
    }

    fn on_order_filled(&mut self, order: &Order) -> Result<(), StrategyError> {
        self.holdings.apply_fill(order);
        Ok(())
    }

    fn close_positions(&mut self) -> Result<Vec<Signal>, StrategyError> {
        Ok(self.holdings.flatten("end of backtest"))
    }
}
