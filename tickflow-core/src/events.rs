//! Typed events — everything that flows over the bus.
//!
//! Events are tagged variants; subscribers register against an
//! [`EventKind`] and pattern-match the payload. Quotes and trades share
//! the `MarketData` kind (consumers discriminate by variant, not symbol).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::{OrderStatus, OrderType, Side};

/// Routing tag for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MarketData,
    Order,
    Fill,
    Timer,
    System,
}

/// Bid/ask update for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid_px: f64,
    pub ask_px: f64,
    pub bid_sz: i64,
    pub ask_sz: i64,
}

impl Quote {
    pub fn spread(&self) -> f64 {
        self.ask_px - self.bid_px
    }

    pub fn mid_price(&self) -> f64 {
        (self.bid_px + self.ask_px) / 2.0
    }
}

/// Last-sale print for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: f64,
    pub size: i64,
}

/// Order lifecycle update: status changes, rejections, fill progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: f64,
    pub qty: i64,
    pub filled_qty: i64,
    pub reject_reason: Option<String>,
}

impl OrderUpdate {
    pub fn remaining_qty(&self) -> i64 {
        self.qty - self.filled_qty
    }
}

/// Execution report for a partial or complete fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub fill_price: f64,
    pub fill_qty: i64,
    pub execution_id: String,
}

/// Named timer tick produced by a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerTick {
    pub name: String,
}

/// System control and status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemEventKind {
    Startup,
    Shutdown,
    TradingStart,
    TradingStop,
    EmergencyStop,
    ConfigReload,
    HealthCheck,
    ConnectionUp,
    ConnectionDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub kind: SystemEventKind,
    pub message: String,
}

/// Event payload, one variant per wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Quote(Quote),
    Trade(Trade),
    Order(OrderUpdate),
    Fill(FillReport),
    Timer(TimerTick),
    System(SystemMessage),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Quote(_) | EventPayload::Trade(_) => EventKind::MarketData,
            EventPayload::Order(_) => EventKind::Order,
            EventPayload::Fill(_) => EventKind::Fill,
            EventPayload::Timer(_) => EventKind::Timer,
            EventPayload::System(_) => EventKind::System,
        }
    }
}

/// A payload stamped at construction.
///
/// The timestamp is monotonic and used only for age measurement; it is
/// never serialized and never mutated after construction.
#[derive(Debug, Clone)]
pub struct Event {
    created_at: Instant,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            created_at: Instant::now(),
            payload,
        }
    }

    pub fn quote(symbol: impl Into<String>, bid_px: f64, ask_px: f64, bid_sz: i64, ask_sz: i64) -> Self {
        Self::new(EventPayload::Quote(Quote {
            symbol: symbol.into(),
            bid_px,
            ask_px,
            bid_sz,
            ask_sz,
        }))
    }

    pub fn trade(symbol: impl Into<String>, price: f64, size: i64) -> Self {
        Self::new(EventPayload::Trade(Trade {
            symbol: symbol.into(),
            price,
            size,
        }))
    }

    pub fn order(update: OrderUpdate) -> Self {
        Self::new(EventPayload::Order(update))
    }

    pub fn fill(report: FillReport) -> Self {
        Self::new(EventPayload::Fill(report))
    }

    pub fn timer(name: impl Into<String>) -> Self {
        Self::new(EventPayload::Timer(TimerTick { name: name.into() }))
    }

    pub fn system(kind: SystemEventKind, message: impl Into<String>) -> Self {
        Self::new(EventPayload::System(SystemMessage {
            kind,
            message: message.into(),
        }))
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Age since construction, for latency instrumentation.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
