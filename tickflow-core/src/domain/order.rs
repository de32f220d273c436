use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::OrderUpdate;

/// Order side.
///
/// Signed convention: a buy contributes `+qty` to a position, a sell `-qty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

/// Order instruction type.
///
/// Only `Market` and `Limit` change behavior inside the engine (market
/// orders attract slippage at the venue); the rest are carried through
/// unchanged for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    Ioc,
    Fok,
}

/// Order lifecycle state.
///
/// Transitions only move forward along the lifecycle graph:
/// `PendingNew -> New -> PartiallyFilled -> Filled`, with `Rejected`
/// reachable from `PendingNew` and `Cancelled` via `PendingCancel` from
/// any active state. Terminal states absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingNew,
    New,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Active orders can still trade or be cancelled.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingNew | OrderStatus::New | OrderStatus::PartiallyFilled
        )
    }

    /// Terminal states absorb all further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// An order with full lifecycle tracking.
///
/// Identity is `id`, unique per process; a duplicate id overwrites the
/// previous record silently (the caller owns uniqueness).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price: f64,
    pub qty: i64,
    pub filled_qty: i64,
    /// Volume-weighted mean of all fill prices; 0.0 until the first fill.
    pub avg_fill_price: f64,
    pub status: OrderStatus,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in `PendingNew`.
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        limit_price: f64,
        qty: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            order_type,
            limit_price,
            qty,
            filled_qty: 0,
            avg_fill_price: 0.0,
            status: OrderStatus::PendingNew,
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_qty(&self) -> i64 {
        (self.qty - self.filled_qty).max(0)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a fill: fold the price into the volume-weighted average and
    /// advance the status to `PartiallyFilled` or `Filled`.
    pub fn apply_fill(&mut self, fill_qty: i64, fill_price: f64) {
        let prior = self.filled_qty;
        let total = prior + fill_qty;
        if total > 0 {
            self.avg_fill_price =
                (self.avg_fill_price * prior as f64 + fill_price * fill_qty as f64) / total as f64;
        }
        self.filled_qty = total;
        self.status = if self.filled_qty >= self.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
    }

    /// Apply an order status update from the event stream.
    pub fn apply_update(&mut self, update: &OrderUpdate) {
        self.status = update.status;
        self.filled_qty = update.filled_qty;
        if update.reject_reason.is_some() {
            self.reject_reason = update.reject_reason.clone();
        }
        self.updated_at = Utc::now();
    }
}
