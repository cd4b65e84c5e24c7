//! Kernel events and the timestamp-ordered queue.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::domain::{ClosedPosition, MarketEvent, Order, Position, Signal};

#[derive(Debug, Clone)]
pub enum EventKind {
    MarketData(Box<MarketEvent>),
    Signal(Signal),
    Order(Order),
    /// Carries filled and rejected orders alike.
    OrderFilled(Order),
    PositionOpen(Position),
    PositionClose(ClosedPosition),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MarketData(_) => "market_data",
            EventKind::Signal(_) => "signal",
            EventKind::Order(_) => "order",
            EventKind::OrderFilled(_) => "order_filled",
            EventKind::PositionOpen(_) => "position_open",
            EventKind::PositionClose(_) => "position_close",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    /// Insertion sequence; breaks timestamp ties.
    pub seq: u64,
    pub symbol: String,
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl Eq for Event {}

impl Ord for Event {
    // Reversed so that `BinaryHeap` pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-queue on `(timestamp, insertion order)`.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, symbol: impl Into<String>, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Event {
            timestamp,
            seq,
            symbol: symbol.into(),
            kind,
        });
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop()
    }

    pub fn peek_time(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
