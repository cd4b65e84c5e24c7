//! The event loop: market data in, signals, orders, fills and positions out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::config::{EngineConfig, EngineError};
use super::event::{Event, EventKind, EventQueue};
use super::journal::{EventRecord, JournalEntry};
use crate::cancel::CancelToken;
use crate::costs::{FeeModel, SlippageModel, TradeContext};
use crate::data::DataLoader;
use crate::domain::{
    ClosedPosition, IdGen, MarketEvent, Order, OrderId, OrderStatus, Position, PositionId,
    RejectReason, Side, Signal,
};
use crate::result::{BacktestResult, DatasetSummary, ResultAggregator, ResultParts};
use crate::risk::{RiskManager, SizingRequest, StandardRiskManager};
use crate::strategy::{Strategy, StrategyError};
use crate::tracker::{PositionTracker, TrackerError, QTY_EPSILON};

const DEFAULT_EXIT_REASON: &str = "signal";

/// What a signal resolves to against the current book.
enum Intent {
    Open,
    Close(PositionId),
    Reject(RejectReason),
}

/// A single-threaded backtest.
///
/// Owns its strategy, cost models, tracker, risk manager and cash ledger.
/// Built from a config and a data loader, consumed by [`Engine::run`].
pub struct Engine {
    config: EngineConfig,
    strategy: Box<dyn Strategy>,
    fees: Box<dyn FeeModel>,
    slippage: Box<dyn SlippageModel>,
    tracker: Box<dyn PositionTracker>,
    risk: Option<Box<dyn RiskManager>>,
    queue: EventQueue,
    cash: f64,
    prices: HashMap<String, f64>,
    order_ids: IdGen,
    trades: Vec<Order>,
    journal: Vec<EventRecord>,
    aggregator: ResultAggregator,
    datasets: Vec<DatasetSummary>,
    now: DateTime<Utc>,
}

impl Engine {
    /// Load every configured symbol and queue one market event per candle.
    ///
    /// `strategy` must already be initialized (the factory does this).
    pub fn new(
        config: EngineConfig,
        loader: &dyn DataLoader,
        strategy: Box<dyn Strategy>,
        cancel: &CancelToken,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let mut journal = vec![EventRecord {
            timestamp: config.start,
            symbol: String::new(),
            entry: JournalEntry::StrategyInitialized {
                name: strategy.name().to_string(),
            },
        }];

        let mut datasets = Vec::with_capacity(config.symbols.len());
        let mut market: Vec<MarketEvent> = Vec::new();
        for symbol in &config.symbols {
            let dataset = loader
                .load_data(symbol, config.interval, config.start, config.end, cancel)
                .map_err(|source| EngineError::Load {
                    symbol: symbol.clone(),
                    source,
                })?;
            let summary = DatasetSummary::from(&dataset);
            journal.push(EventRecord {
                timestamp: config.start,
                symbol: symbol.clone(),
                entry: JournalEntry::DataLoaded {
                    candles: summary.candles,
                    warnings: summary.warnings.len(),
                    dataset_hash: summary.hash.clone(),
                },
            });
            datasets.push(summary);
            market.extend((0..dataset.len()).filter_map(|i| dataset.market_event(i)));
        }

        // Stable: ties on timestamp fall back to symbol, then load order.
        market.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        let mut queue = EventQueue::new();
        for event in market {
            let (timestamp, symbol) = (event.timestamp, event.symbol.clone());
            queue.push(timestamp, symbol, EventKind::MarketData(Box::new(event)));
        }

        let risk = config.risk.as_ref().map(|params| {
            Box::new(StandardRiskManager::new(params.clone(), config.initial_capital))
                as Box<dyn RiskManager>
        });

        Ok(Self {
            fees: config.fees.build(),
            slippage: config.slippage.build(),
            tracker: config.tracker.build(),
            risk,
            queue,
            cash: config.initial_capital,
            prices: HashMap::new(),
            order_ids: IdGen::new(),
            trades: Vec::new(),
            journal,
            aggregator: ResultAggregator::new(config.initial_capital),
            datasets,
            now: config.start,
            strategy,
            config,
        })
    }

    /// Replace the risk manager built from the config (or add one).
    pub fn with_risk_manager(mut self, risk: Box<dyn RiskManager>) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue, close out, and assemble the result.
    ///
    /// Cancellation is checked between events. A cancelled run still closes
    /// out and returns its partial result with `cancelled` set.
    pub fn run(mut self, cancel: &CancelToken) -> Result<BacktestResult, EngineError> {
        tracing::info!(
            strategy = self.strategy.name(),
            symbols = ?self.config.symbols,
            events = self.queue.len(),
            "backtest started"
        );

        let mut cancelled = false;
        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                tracing::info!(at = %self.now, pending = self.queue.len(), "backtest cancelled");
                self.queue.clear();
                self.record(String::new(), JournalEntry::Cancelled);
                break;
            }
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.dispatch(event)?;
        }

        self.close_out()?;

        let final_capital = self.equity();
        tracing::info!(
            final_capital,
            trades = self.trades.len(),
            closed = self.tracker.closed_positions().len(),
            cancelled,
            "backtest finished"
        );

        let parts = ResultParts {
            strategy: self.strategy.name().to_string(),
            final_capital,
            final_cash: self.cash,
            trades: self.trades,
            positions: self.tracker.open_positions().into_iter().cloned().collect(),
            closed_positions: self.tracker.closed_positions().to_vec(),
            events: self.journal,
            cancelled,
            datasets: self.datasets,
            config: self.config,
        };
        Ok(self.aggregator.finish(parts))
    }

    // ─── Dispatch ────────────────────────────────────────────────────

    fn dispatch(&mut self, event: Event) -> Result<(), EngineError> {
        self.now = self.now.max(event.timestamp);
        tracing::trace!(kind = event.kind.name(), symbol = %event.symbol, at = %event.timestamp, "dispatch");
        match event.kind {
            EventKind::MarketData(market) => self.on_market_data(*market),
            EventKind::Signal(signal) => self.on_signal(signal),
            EventKind::Order(order) => self.on_order(order),
            EventKind::OrderFilled(order) => self.on_order_filled(order),
            EventKind::PositionOpen(position) => {
                self.on_position_open(position);
                Ok(())
            }
            EventKind::PositionClose(closed) => self.on_position_close(closed),
        }
    }

    fn on_market_data(&mut self, event: MarketEvent) -> Result<(), EngineError> {
        let symbol = event.symbol.clone();
        let price = event.candle.close;
        self.prices.insert(symbol.clone(), price);

        // Risk exits queue ahead of anything the strategy says at this tick.
        let exits = match self.risk.as_mut() {
            Some(risk) => risk.on_price_update(&symbol, price, self.now),
            None => Vec::new(),
        };
        for signal in exits {
            self.enqueue_signal(signal);
        }

        let outcome = self.strategy.on_market_event(&event);
        let mut signals = self.guard(&symbol, outcome)?;
        let outcome = self.strategy.on_tick(&symbol, self.now, &event.candle);
        signals.extend(self.guard(&symbol, outcome)?);
        for signal in signals {
            self.enqueue_signal(signal);
        }

        let equity = self.equity();
        self.record_equity(equity);
        self.record(symbol, JournalEntry::MarketData { close: price, equity });
        Ok(())
    }

    fn on_signal(&mut self, signal: Signal) -> Result<(), EngineError> {
        self.record(
            signal.symbol.clone(),
            JournalEntry::Signal {
                side: signal.side,
                quantity: signal.quantity,
                price: signal.price,
                reason: signal.reason.clone(),
            },
        );

        let last_price = self.prices.get(&signal.symbol).copied();
        let id = OrderId(self.order_ids.next_id());
        let mut order = Order::market(
            id,
            signal.symbol.clone(),
            signal.side,
            signal.quantity,
            last_price.unwrap_or(signal.price),
            self.now,
        );
        order.reason = signal.reason.clone();

        let Some(price) = last_price else {
            let symbol = signal.symbol.clone();
            return self.reject(order, RejectReason::NoPrice { symbol });
        };

        match self.resolve(&signal) {
            Intent::Reject(reason) => return self.reject(order, reason),
            Intent::Close(position_id) => {
                let held = self
                    .tracker
                    .get(position_id)
                    .map(|p| p.quantity)
                    .unwrap_or(0.0);
                order.position_id = Some(position_id);
                order.quantity = if signal.quantity > QTY_EPSILON {
                    signal.quantity.min(held)
                } else {
                    held
                };
            }
            Intent::Open => match self.size(&signal, price) {
                Some(quantity) => order.quantity = quantity,
                None => return Ok(()),
            },
        }

        self.record(
            order.symbol.clone(),
            JournalEntry::OrderCreated {
                order_id: order.id,
                side: order.side,
                quantity: order.quantity,
                price: order.price,
            },
        );
        let symbol = order.symbol.clone();
        self.queue.push(self.now, symbol, EventKind::Order(order));
        Ok(())
    }

    fn on_order(&mut self, order: Order) -> Result<(), EngineError> {
        match order.position_id {
            Some(id) => self.execute_close(order, id),
            None => self.execute_open(order),
        }
    }

    fn on_order_filled(&mut self, order: Order) -> Result<(), EngineError> {
        let outcome = self.strategy.on_order_filled(&order);
        self.guard(&order.symbol, outcome)
    }

    fn on_position_open(&mut self, position: Position) {
        if let Some(risk) = self.risk.as_mut() {
            risk.on_position_opened(&position);
        }
        self.record(
            position.symbol.clone(),
            JournalEntry::PositionOpened {
                position_id: position.id,
                side: position.side,
                quantity: position.quantity,
                entry_price: position.entry_price,
            },
        );
    }

    fn on_position_close(&mut self, closed: ClosedPosition) -> Result<(), EngineError> {
        if let Some(risk) = self.risk.as_mut() {
            risk.on_position_closed(&closed);
        }
        self.record(
            closed.symbol.clone(),
            JournalEntry::PositionClosed {
                position_id: closed.id,
                side: closed.side,
                quantity: closed.quantity,
                exit_price: closed.exit_price,
                profit_loss: closed.profit_loss,
                exit_reason: closed.exit_reason.clone(),
            },
        );
        let outcome = self.strategy.on_position_closed(&closed);
        self.guard(&closed.symbol, outcome)
    }

    // ─── Signals to orders ───────────────────────────────────────────

    /// An opposite-side open position is exited first; otherwise a Buy opens
    /// a long and a Sell opens a short when shorting is allowed.
    fn resolve(&self, signal: &Signal) -> Intent {
        let exit_of = signal.side.opposite();
        match self
            .tracker
            .match_exit(&signal.symbol, exit_of, signal.position_id)
        {
            Some(id) if signal.position_id.map_or(true, |want| want == id) => {
                return Intent::Close(id)
            }
            _ => {}
        }
        let not_found = || RejectReason::PositionNotFound {
            symbol: signal.symbol.clone(),
        };
        if signal.position_id.is_some() {
            return Intent::Reject(not_found());
        }
        match signal.side {
            Side::Buy => Intent::Open,
            Side::Sell if self.config.allow_short => Intent::Open,
            Side::Sell => Intent::Reject(not_found()),
        }
    }

    /// Quantity for an opening order, or `None` when risk denies it.
    fn size(&mut self, signal: &Signal, price: f64) -> Option<f64> {
        let Some(risk) = self.risk.as_ref() else {
            return Some(signal.quantity);
        };
        let open = self.tracker.open_positions();
        let request = SizingRequest {
            symbol: &signal.symbol,
            side: signal.side,
            entry_price: price,
            stop_loss: signal.stop_loss,
            open_positions: open.len(),
            current_exposure: open.iter().map(|p| p.notional()).sum(),
            timestamp: self.now,
        };
        let decision = risk.size_position(&request);
        match decision.denial {
            Some(reason) => {
                tracing::debug!(symbol = %signal.symbol, side = %signal.side, %reason, "risk denied");
                self.record(
                    signal.symbol.clone(),
                    JournalEntry::RiskDenied {
                        side: signal.side,
                        reason,
                    },
                );
                None
            }
            None if signal.quantity > QTY_EPSILON => Some(signal.quantity.min(decision.quantity)),
            None => Some(decision.quantity),
        }
    }

    fn enqueue_signal(&mut self, mut signal: Signal) {
        if signal.timestamp < self.now {
            tracing::debug!(symbol = %signal.symbol, at = %signal.timestamp, now = %self.now, "signal clamped to current time");
            signal.timestamp = self.now;
        }
        let (timestamp, symbol) = (signal.timestamp, signal.symbol.clone());
        self.queue.push(timestamp, symbol, EventKind::Signal(signal));
    }

    // ─── Execution ───────────────────────────────────────────────────

    /// Per-unit slippage, execution price and fee for `quantity` of `order`.
    fn price_fill(&mut self, order: &Order, quantity: f64) -> (f64, f64, f64) {
        let ctx = TradeContext {
            symbol: &order.symbol,
            side: order.side,
            quantity,
            price: order.price,
            timestamp: self.now,
        };
        let slippage = self.slippage.slippage(&ctx);
        let exec = order.price + order.side.sign() * slippage;
        let rate = self.fees.fee_rate(&TradeContext { price: exec, ..ctx });
        (slippage, exec, rate * exec * quantity)
    }

    fn execute_open(&mut self, mut order: Order) -> Result<(), EngineError> {
        let quantity = order.quantity;
        if !(quantity.is_finite() && quantity > QTY_EPSILON) {
            return self.reject(order, RejectReason::InvalidQuantity { quantity });
        }

        let (slippage, exec, fee) = self.price_fill(&order, quantity);
        // Longs pay for the asset; shorts post the same amount as collateral.
        let required = quantity * exec + fee;
        if self.cash < required {
            let available = self.cash;
            return self.reject(
                order,
                RejectReason::InsufficientFunds {
                    required,
                    available,
                },
            );
        }

        let position = match self
            .tracker
            .open(&order.symbol, order.side, exec, quantity, self.now)
        {
            Ok(position) => position,
            Err(e) => {
                let reason = reject_reason(e, &order.symbol);
                return self.reject(order, reason);
            }
        };

        self.cash -= required;
        order.position_id = Some(position.id);
        order.fill(exec, quantity, fee, slippage, self.now)?;
        self.settle(order, EventKind::PositionOpen(position));
        Ok(())
    }

    fn execute_close(&mut self, mut order: Order, id: PositionId) -> Result<(), EngineError> {
        let Some(position) = self.tracker.get(id).cloned() else {
            let symbol = order.symbol.clone();
            return self.reject(order, RejectReason::PositionNotFound { symbol });
        };
        let quantity = order.quantity.min(position.quantity);
        if !(quantity.is_finite() && quantity > QTY_EPSILON) {
            return self.reject(order, RejectReason::InvalidQuantity { quantity });
        }

        let (slippage, exec, fee) = self.price_fill(&order, quantity);
        let reason = if order.reason.is_empty() {
            DEFAULT_EXIT_REASON.to_string()
        } else {
            order.reason.clone()
        };
        let closed = match self.tracker.reduce(id, quantity, exec, self.now, &reason) {
            Ok(closed) => closed,
            Err(e) => {
                let reason = reject_reason(e, &order.symbol);
                return self.reject(order, reason);
            }
        };

        // Entry notional (sale proceeds or returned collateral) plus P&L.
        self.cash += closed.quantity * position.entry_price + closed.profit_loss - fee;
        order.fill(exec, quantity, fee, slippage, self.now)?;
        self.settle(order, EventKind::PositionClose(closed));
        Ok(())
    }

    fn settle(&mut self, order: Order, position_event: EventKind) {
        self.record(
            order.symbol.clone(),
            JournalEntry::OrderFilled {
                order_id: order.id,
                side: order.side,
                quantity: order.quantity,
                price: order.price,
                fee: order.fee,
                slippage: order.slippage,
            },
        );
        self.trades.push(order.clone());
        let symbol = order.symbol.clone();
        self.queue.push(self.now, symbol.clone(), position_event);
        self.queue.push(self.now, symbol, EventKind::OrderFilled(order));
    }

    fn reject(&mut self, mut order: Order, reason: RejectReason) -> Result<(), EngineError> {
        tracing::warn!(order = %order.id, symbol = %order.symbol, side = %order.side, %reason, "order rejected");
        self.record(
            order.symbol.clone(),
            JournalEntry::OrderRejected {
                order_id: order.id,
                side: order.side,
                quantity: order.quantity,
                reason: reason.clone(),
            },
        );
        order.reject(reason)?;
        debug_assert_eq!(order.status, OrderStatus::Rejected);
        let symbol = order.symbol.clone();
        self.queue.push(self.now, symbol, EventKind::OrderFilled(order));
        Ok(())
    }

    // ─── Close-out and bookkeeping ───────────────────────────────────

    fn close_out(&mut self) -> Result<(), EngineError> {
        let fills_before = self.trades.len();
        let outcome = self.strategy.close_positions();
        let signals = self.guard("", outcome)?;
        for signal in signals {
            self.enqueue_signal(signal);
        }
        while let Some(event) = self.queue.pop() {
            self.dispatch(event)?;
        }
        if self.trades.len() > fills_before {
            let equity = self.equity();
            self.record_equity(equity);
        }
        Ok(())
    }

    /// Cash plus every open position marked at its symbol's last price.
    fn equity(&self) -> f64 {
        let marked: f64 = self
            .tracker
            .open_positions()
            .iter()
            .map(|p| {
                let price = self.prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.mark_value(price)
            })
            .sum();
        self.cash + marked
    }

    fn record_equity(&mut self, equity: f64) {
        self.aggregator.record(self.now, equity);
        if let Some(risk) = self.risk.as_mut() {
            risk.on_equity_update(equity, self.now);
        }
    }

    fn record(&mut self, symbol: String, entry: JournalEntry) {
        self.journal.push(EventRecord {
            timestamp: self.now,
            symbol,
            entry,
        });
    }

    /// Tolerant strategies have their errors journaled and replaced by a
    /// default value; otherwise the run stops.
    fn guard<T: Default>(
        &mut self,
        symbol: &str,
        outcome: Result<T, StrategyError>,
    ) -> Result<T, EngineError> {
        match outcome {
            Ok(value) => Ok(value),
            Err(e) if self.strategy.is_fault_tolerant() => {
                tracing::warn!(strategy = self.strategy.name(), symbol, error = %e, "strategy error ignored");
                self.record(
                    symbol.to_string(),
                    JournalEntry::StrategyError {
                        message: e.to_string(),
                    },
                );
                Ok(T::default())
            }
            Err(source) => Err(EngineError::Strategy {
                timestamp: self.now,
                source,
            }),
        }
    }
}

fn reject_reason(error: TrackerError, symbol: &str) -> RejectReason {
    match error {
        TrackerError::AlreadyOpen { .. } => RejectReason::PositionAlreadyOpen {
            symbol: symbol.to_string(),
        },
        TrackerError::InvalidQuantity { quantity } => RejectReason::InvalidQuantity { quantity },
        TrackerError::NotFound(_) | TrackerError::MissingPrice { .. } => {
            RejectReason::PositionNotFound {
                symbol: symbol.to_string(),
            }
        }
    }
}
