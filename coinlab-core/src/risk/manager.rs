//! Position sizing, opening gates, trailing stops and tiered take-profits.

use super::params::RiskParameters;
use super::ratchet::RatchetState;
use crate::domain::{ClosedPosition, Position, PositionId, Side, Signal};
use crate::tracker::QTY_EPSILON;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const TRAILING_STOP_REASON: &str = "Trailing stop";

/// Why the risk manager refused to open a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDenial {
    Drawdown,
    Exposure,
    Positions,
    DailyLoss,
    MinBalance,
    InvalidPrice,
    /// Sizing inputs left nothing to buy.
    ZeroSize,
}

impl RiskDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskDenial::Drawdown => "drawdown",
            RiskDenial::Exposure => "exposure",
            RiskDenial::Positions => "positions",
            RiskDenial::DailyLoss => "daily loss",
            RiskDenial::MinBalance => "min balance",
            RiskDenial::InvalidPrice => "invalid price",
            RiskDenial::ZeroSize => "zero size",
        }
    }
}

impl fmt::Display for RiskDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for sizing a new position. The ledger figures come from the
/// kernel, which owns the tracker.
#[derive(Debug, Clone, Copy)]
pub struct SizingRequest<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub open_positions: usize,
    /// Entry notional of every open position.
    pub current_exposure: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingDecision {
    pub quantity: f64,
    pub denial: Option<RiskDenial>,
}

impl SizingDecision {
    pub fn approved(quantity: f64) -> Self {
        Self {
            quantity,
            denial: None,
        }
    }

    pub fn denied(reason: RiskDenial) -> Self {
        Self {
            quantity: 0.0,
            denial: Some(reason),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.denial.is_none() && self.quantity > 0.0
    }
}

/// One tier of a take-profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub position_id: PositionId,
    /// 1-based.
    pub level: usize,
    pub price: f64,
    pub quantity_pct: f64,
    pub quantity: f64,
    pub triggered: bool,
}

impl TakeProfitLevel {
    fn is_reached(&self, side: Side, price: f64) -> bool {
        match side {
            Side::Buy => price >= self.price,
            Side::Sell => price <= self.price,
        }
    }
}

/// Risk controls consulted by the kernel.
///
/// Hooks are driven only by the kernel's event loop. Exit requests are
/// returned as signals for the kernel to enqueue.
pub trait RiskManager: Send + Sync {
    fn size_position(&self, request: &SizingRequest<'_>) -> SizingDecision;

    fn on_position_opened(&mut self, position: &Position);

    fn on_position_closed(&mut self, closed: &ClosedPosition);

    fn on_price_update(&mut self, symbol: &str, price: f64, at: DateTime<Utc>) -> Vec<Signal>;

    fn on_equity_update(&mut self, equity: f64, at: DateTime<Utc>);

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
struct Guarded {
    symbol: String,
    side: Side,
    quantity: f64,
    stop: Option<RatchetState>,
    take_profits: Vec<TakeProfitLevel>,
}

/// The standard risk manager.
#[derive(Debug, Clone)]
pub struct StandardRiskManager {
    params: RiskParameters,
    initial_capital: f64,
    capital: f64,
    high_water: f64,
    drawdown_pct: f64,
    daily_pnl: BTreeMap<NaiveDate, f64>,
    guarded: BTreeMap<PositionId, Guarded>,
}

impl StandardRiskManager {
    pub fn new(params: RiskParameters, initial_capital: f64) -> Self {
        Self {
            params,
            initial_capital,
            capital: initial_capital,
            high_water: initial_capital,
            drawdown_pct: 0.0,
            daily_pnl: BTreeMap::new(),
            guarded: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &RiskParameters {
        &self.params
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn current_drawdown_pct(&self) -> f64 {
        self.drawdown_pct
    }

    pub fn daily_pnl(&self, day: NaiveDate) -> f64 {
        self.daily_pnl.get(&day).copied().unwrap_or(0.0)
    }

    /// The day's realized loss as a percentage of initial capital (0 when
    /// the day is flat or positive).
    pub fn daily_loss_pct(&self, day: NaiveDate) -> f64 {
        let pnl = self.daily_pnl(day);
        if pnl < 0.0 && self.initial_capital > 0.0 {
            pnl.abs() / self.initial_capital * 100.0
        } else {
            0.0
        }
    }

    pub fn trailing_stop(&self, id: PositionId) -> Option<f64> {
        self.guarded
            .get(&id)
            .and_then(|g| g.stop.as_ref())
            .map(RatchetState::level)
    }

    pub fn take_profit_levels(&self, id: PositionId) -> &[TakeProfitLevel] {
        self.guarded
            .get(&id)
            .map(|g| g.take_profits.as_slice())
            .unwrap_or(&[])
    }

    /// Account-level gates that apply to any new position.
    pub fn is_trade_allowed(&self, at: DateTime<Utc>) -> Result<(), RiskDenial> {
        if self.capital < self.params.min_account_balance {
            return Err(RiskDenial::MinBalance);
        }
        if self.drawdown_pct > self.params.max_drawdown_pct {
            return Err(RiskDenial::Drawdown);
        }
        if self.daily_loss_pct(at.date_naive()) > self.params.max_daily_loss_pct {
            return Err(RiskDenial::DailyLoss);
        }
        Ok(())
    }

    fn take_profit_ladder(&self, position: &Position) -> Vec<TakeProfitLevel> {
        if !self.params.use_take_profits {
            return Vec::new();
        }
        self.params
            .take_profit_levels
            .iter()
            .zip(self.params.take_profit_split())
            .enumerate()
            .map(|(i, (distance, pct))| {
                let offset = position.side.sign() * distance / 100.0;
                TakeProfitLevel {
                    position_id: position.id,
                    level: i + 1,
                    price: position.entry_price * (1.0 + offset),
                    quantity_pct: pct,
                    quantity: position.quantity * pct / 100.0,
                    triggered: false,
                }
            })
            .collect()
    }

    fn stop_for(&self, side: Side, price: f64) -> f64 {
        price * (1.0 - side.sign() * self.params.trailing_stop_pct / 100.0)
    }
}

impl RiskManager for StandardRiskManager {
    fn size_position(&self, request: &SizingRequest<'_>) -> SizingDecision {
        let entry = request.entry_price;
        if !(entry.is_finite() && entry > 0.0) {
            return SizingDecision::denied(RiskDenial::InvalidPrice);
        }
        if let Err(denial) = self.is_trade_allowed(request.timestamp) {
            return SizingDecision::denied(denial);
        }
        if request.open_positions >= self.params.max_positions {
            return SizingDecision::denied(RiskDenial::Positions);
        }

        let capital = self.capital;
        let by_risk = match request.stop_loss {
            Some(stop) if (entry - stop).abs() > 0.0 => {
                capital * self.params.max_risk_per_trade_pct / 100.0 / (entry - stop).abs()
            }
            _ => capital * self.params.max_position_size_pct / 100.0 / entry,
        };
        let max_by_size = capital * self.params.max_position_size_pct / 100.0 / entry;

        let budget = capital * self.params.max_total_exposure_pct / 100.0 - request.current_exposure;
        if budget <= 0.0 {
            return SizingDecision::denied(RiskDenial::Exposure);
        }

        let quantity = by_risk.min(max_by_size).min(budget / entry);
        if !(quantity > 0.0) {
            return SizingDecision::denied(RiskDenial::ZeroSize);
        }
        SizingDecision::approved(quantity)
    }

    fn on_position_opened(&mut self, position: &Position) {
        let stop = self
            .params
            .use_trailing_stops
            .then(|| RatchetState::new(position.side, self.stop_for(position.side, position.entry_price)));
        let take_profits = self.take_profit_ladder(position);
        self.guarded.insert(
            position.id,
            Guarded {
                symbol: position.symbol.clone(),
                side: position.side,
                quantity: position.quantity,
                stop,
                take_profits,
            },
        );
    }

    fn on_position_closed(&mut self, closed: &ClosedPosition) {
        *self
            .daily_pnl
            .entry(closed.close_time.date_naive())
            .or_insert(0.0) += closed.profit_loss;

        if let Some(guarded) = self.guarded.get_mut(&closed.id) {
            guarded.quantity -= closed.quantity;
            if guarded.quantity <= QTY_EPSILON {
                self.guarded.remove(&closed.id);
            }
        }
    }

    fn on_price_update(&mut self, symbol: &str, price: f64, at: DateTime<Utc>) -> Vec<Signal> {
        let mut signals = Vec::new();
        let trailing_pct = self.params.trailing_stop_pct;

        for (id, guarded) in self.guarded.iter_mut().filter(|(_, g)| g.symbol == symbol) {
            let exit_side = guarded.side.opposite();

            if let Some(stop) = guarded.stop.as_mut() {
                if stop.is_hit(price) {
                    tracing::debug!(position = %id, price, stop = stop.level(), "trailing stop hit");
                    signals.push(
                        Signal::new(symbol, exit_side, guarded.quantity, price, at, TRAILING_STOP_REASON)
                            .for_position(*id),
                    );
                    guarded.stop = None;
                    guarded.take_profits.clear();
                    continue;
                }
                stop.apply(price * (1.0 - guarded.side.sign() * trailing_pct / 100.0));
            }

            let mut allotted = 0.0;
            for level in guarded.take_profits.iter_mut() {
                if level.triggered || !level.is_reached(guarded.side, price) {
                    continue;
                }
                level.triggered = true;
                let quantity = level.quantity.min(guarded.quantity - allotted);
                if quantity <= QTY_EPSILON {
                    continue;
                }
                allotted += quantity;
                signals.push(
                    Signal::new(
                        symbol,
                        exit_side,
                        quantity,
                        price,
                        at,
                        format!("Take profit level {}", level.level),
                    )
                    .for_position(*id),
                );
            }
        }

        signals
    }

    fn on_equity_update(&mut self, equity: f64, _at: DateTime<Utc>) {
        self.capital = equity;
        if equity > self.high_water {
            self.high_water = equity;
        }
        self.drawdown_pct = if self.high_water > 0.0 {
            ((self.high_water - equity) / self.high_water * 100.0).max(0.0)
        } else {
            0.0
        };
    }

    fn name(&self) -> &str {
        "standard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn request(entry: f64, stop: Option<f64>) -> SizingRequest<'static> {
        SizingRequest {
            symbol: "BTCUSDT",
            side: Side::Buy,
            entry_price: entry,
            stop_loss: stop,
            open_positions: 0,
            current_exposure: 0.0,
            timestamp: t(1),
        }
    }

    fn position(id: u64, side: Side, entry: f64, qty: f64) -> Position {
        Position {
            id: PositionId(id),
            symbol: "BTCUSDT".into(),
            side,
            quantity: qty,
            entry_price: entry,
            open_time: t(0),
        }
    }

    fn closed(id: u64, pnl: f64, at: DateTime<Utc>) -> ClosedPosition {
        let mut c = position(id, Side::Buy, 100.0, 1.0).realize(1.0, 100.0 + pnl, at, "test");
        c.profit_loss = pnl;
        c
    }

    #[test]
    fn sizes_by_stop_distance_capped_by_position_size() {
        let rm = StandardRiskManager::new(RiskParameters::default(), 10_000.0);
        // 2% of 10k = 200 at risk over a 5.0 stop distance = 40 units, capped
        // by 20% of 10k / 100 = 20 units
        let d = rm.size_position(&request(100.0, Some(95.0)));
        assert!(d.is_approved());
        assert!((d.quantity - 20.0).abs() < 1e-9);

        // wide stop: 200 / 50 = 4 units
        let d = rm.size_position(&request(100.0, Some(50.0)));
        assert!((d.quantity - 4.0).abs() < 1e-9);

        // no stop: position-size share
        let d = rm.size_position(&request(100.0, None));
        assert!((d.quantity - 20.0).abs() < 1e-9);
    }

    #[test]
    fn exposure_budget_clamps_and_denies() {
        let params = RiskParameters {
            max_total_exposure_pct: 50.0,
            ..RiskParameters::default()
        };
        let rm = StandardRiskManager::new(params, 10_000.0);
        let mut req = request(100.0, None);
        req.current_exposure = 4_500.0;
        let d = rm.size_position(&req);
        assert!((d.quantity - 5.0).abs() < 1e-9);

        req.current_exposure = 5_000.0;
        let d = rm.size_position(&req);
        assert_eq!(d, SizingDecision::denied(RiskDenial::Exposure));
        assert_eq!(d.denial.unwrap().to_string(), "exposure");
    }

    #[test]
    fn position_count_gate() {
        let params = RiskParameters {
            max_positions: 2,
            ..RiskParameters::default()
        };
        let rm = StandardRiskManager::new(params, 10_000.0);
        let mut req = request(100.0, None);
        req.open_positions = 2;
        assert_eq!(rm.size_position(&req).denial, Some(RiskDenial::Positions));
    }

    #[test]
    fn drawdown_gate_uses_equity_updates() {
        let params = RiskParameters {
            max_drawdown_pct: 10.0,
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        rm.on_equity_update(12_000.0, t(0));
        rm.on_equity_update(10_700.0, t(1));
        assert!((rm.current_drawdown_pct() - 10.833333).abs() < 1e-5);
        assert_eq!(
            rm.size_position(&request(100.0, None)).denial,
            Some(RiskDenial::Drawdown)
        );
        rm.on_equity_update(11_000.0, t(2));
        assert!(rm.size_position(&request(100.0, None)).is_approved());
    }

    #[test]
    fn min_balance_gate() {
        let params = RiskParameters {
            min_account_balance: 5_000.0,
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        rm.on_equity_update(4_999.0, t(0));
        let d = rm.size_position(&request(100.0, None));
        assert_eq!(d.denial, Some(RiskDenial::MinBalance));
        assert_eq!(d.quantity, 0.0);
    }

    #[test]
    fn daily_loss_gate_resets_next_day() {
        let params = RiskParameters {
            max_daily_loss_pct: 5.0,
            max_drawdown_pct: 99.0,
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        rm.on_position_closed(&closed(1, -350.0, t(2)));
        rm.on_position_closed(&closed(2, -250.0, t(3)));
        assert!((rm.daily_loss_pct(t(3).date_naive()) - 6.0).abs() < 1e-12);

        let d = rm.size_position(&request(100.0, None));
        assert_eq!(d.quantity, 0.0);
        assert_eq!(d.denial.map(|r| r.to_string()).as_deref(), Some("daily loss"));

        let mut tomorrow = request(100.0, None);
        tomorrow.timestamp = t(25);
        assert!(rm.size_position(&tomorrow).is_approved());
    }

    #[test]
    fn collapsed_size_is_not_a_balance_denial() {
        let params = RiskParameters {
            max_position_size_pct: 0.0,
            ..RiskParameters::default()
        };
        let rm = StandardRiskManager::new(params, 10_000.0);
        let d = rm.size_position(&request(100.0, None));
        assert_eq!(d.quantity, 0.0);
        assert_eq!(d.denial, Some(RiskDenial::ZeroSize));
        assert_eq!(d.denial.unwrap().to_string(), "zero size");
    }

    #[test]
    fn invalid_entry_price_is_denied() {
        let rm = StandardRiskManager::new(RiskParameters::default(), 10_000.0);
        assert_eq!(
            rm.size_position(&request(0.0, None)).denial,
            Some(RiskDenial::InvalidPrice)
        );
    }

    #[test]
    fn trailing_stop_ratchets_then_fires_once() {
        let params = RiskParameters {
            use_trailing_stops: true,
            trailing_stop_pct: 5.0,
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        let pos = position(1, Side::Buy, 100.0, 2.0);
        rm.on_position_opened(&pos);
        assert_eq!(rm.trailing_stop(pos.id), Some(95.0));

        assert!(rm.on_price_update("BTCUSDT", 120.0, t(1)).is_empty());
        assert!((rm.trailing_stop(pos.id).unwrap() - 114.0).abs() < 1e-9);

        // a dip that stays above the stop never loosens it
        assert!(rm.on_price_update("BTCUSDT", 116.0, t(2)).is_empty());
        assert!((rm.trailing_stop(pos.id).unwrap() - 114.0).abs() < 1e-9);

        let signals = rm.on_price_update("BTCUSDT", 113.0, t(3));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Sell);
        assert_eq!(signals[0].quantity, 2.0);
        assert_eq!(signals[0].reason, TRAILING_STOP_REASON);
        assert_eq!(signals[0].position_id, Some(pos.id));

        assert!(rm.on_price_update("BTCUSDT", 100.0, t(4)).is_empty());
    }

    #[test]
    fn short_trailing_stop_is_symmetric() {
        let params = RiskParameters {
            use_trailing_stops: true,
            trailing_stop_pct: 10.0,
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        let pos = position(4, Side::Sell, 100.0, 1.0);
        rm.on_position_opened(&pos);
        assert!((rm.trailing_stop(pos.id).unwrap() - 110.0).abs() < 1e-9);
        assert!(rm.on_price_update("BTCUSDT", 80.0, t(1)).is_empty());
        assert!((rm.trailing_stop(pos.id).unwrap() - 88.0).abs() < 1e-9);
        let signals = rm.on_price_update("BTCUSDT", 89.0, t(2));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Buy);
    }

    #[test]
    fn take_profit_ladder_triggers_each_level_once() {
        let params = RiskParameters {
            use_take_profits: true,
            take_profit_levels: vec![5.0, 10.0],
            take_profit_sizes: vec![50.0],
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        let pos = position(7, Side::Buy, 100.0, 4.0);
        rm.on_position_opened(&pos);

        let ladder = rm.take_profit_levels(pos.id);
        assert_eq!(ladder.len(), 2);
        assert!((ladder[0].price - 105.0).abs() < 1e-9);
        assert!((ladder[1].price - 110.0).abs() < 1e-9);
        assert_eq!(ladder[1].quantity_pct, 50.0);

        let first = rm.on_price_update("BTCUSDT", 106.0, t(1));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].quantity, 2.0);
        assert_eq!(first[0].reason, "Take profit level 1");
        assert!(rm.on_price_update("BTCUSDT", 107.0, t(2)).is_empty());

        rm.on_position_closed(&pos.realize(2.0, 106.0, t(2), "Take profit level 1"));
        let second = rm.on_price_update("BTCUSDT", 111.0, t(3));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].quantity, 2.0);
        assert_eq!(second[0].reason, "Take profit level 2");
    }

    #[test]
    fn closing_the_rest_forgets_the_position() {
        let params = RiskParameters {
            use_trailing_stops: true,
            ..RiskParameters::default()
        };
        let mut rm = StandardRiskManager::new(params, 10_000.0);
        let pos = position(9, Side::Buy, 100.0, 1.0);
        rm.on_position_opened(&pos);
        rm.on_position_closed(&pos.realize(1.0, 101.0, t(1), "signal"));
        assert_eq!(rm.trailing_stop(pos.id), None);
        assert!(rm.on_price_update("BTCUSDT", 1.0, t(2)).is_empty());
        assert_eq!(rm.daily_pnl(t(1).date_naive()), 1.0);
    }
}
