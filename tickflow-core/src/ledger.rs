//! Order ledger — the book of record for orders and positions.
//!
//! The ledger is authoritative but tolerant: events referencing unknown
//! order ids create phantom records instead of failing, so the book
//! survives venue-originated states it never pre-registered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::bus::{EventBus, SubscriptionId};
use crate::domain::{Order, OrderStatus, OrderType, Position, Side};
use crate::events::{Event, EventKind, EventPayload, FillReport, OrderUpdate};

#[derive(Default)]
struct LedgerState {
    orders: HashMap<String, Order>,
    positions: HashMap<String, Position>,
}

/// Tracks every order and the per-symbol net position.
///
/// Subscribes to `Order` and `Fill` events on construction and keeps
/// itself current from the stream, including its own republishes. The
/// internal lock is always released before publishing so downstream
/// subscribers may call back into the ledger.
pub struct OrderLedger {
    state: Arc<Mutex<LedgerState>>,
    bus: Arc<EventBus>,
    order_sub: SubscriptionId,
    fill_sub: SubscriptionId,
}

impl OrderLedger {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let state = Arc::new(Mutex::new(LedgerState::default()));

        let order_state = state.clone();
        let order_sub = bus.subscribe(EventKind::Order, move |event| {
            if let EventPayload::Order(update) = &event.payload {
                Self::on_order_update(&order_state, update);
            }
        });

        let fill_state = state.clone();
        let fill_sub = bus.subscribe(EventKind::Fill, move |event| {
            if let EventPayload::Fill(report) = &event.payload {
                Self::on_fill(&fill_state, report);
            }
        });

        Self {
            state,
            bus,
            order_sub,
            fill_sub,
        }
    }

    /// Record a new order and publish `Order(PendingNew)`.
    ///
    /// Order id uniqueness is the caller's responsibility; a duplicate id
    /// overwrites the existing record silently.
    pub fn submit_order(
        &self,
        order_id: &str,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        price: f64,
        qty: i64,
    ) {
        {
            let mut state = self.state.lock();
            state.orders.insert(
                order_id.to_string(),
                Order::new(order_id, symbol, side, order_type, price, qty),
            );
        }

        self.bus.publish(&Event::order(OrderUpdate {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type,
            status: OrderStatus::PendingNew,
            price,
            qty,
            filled_qty: 0,
            reject_reason: None,
        }));
    }

    /// Request cancellation of an active order.
    ///
    /// Unknown or inactive orders are ignored. Publishes
    /// `Order(PendingCancel)` carrying the current filled quantity.
    pub fn cancel_order(&self, order_id: &str) {
        let update = {
            let state = self.state.lock();
            match state.orders.get(order_id) {
                Some(order) if order.is_active() => OrderUpdate {
                    order_id: order.id.clone(),
                    symbol: order.symbol.clone(),
                    side: order.side,
                    order_type: order.order_type,
                    status: OrderStatus::PendingCancel,
                    price: order.limit_price,
                    qty: order.qty,
                    filled_qty: order.filled_qty,
                    reject_reason: None,
                },
                _ => return,
            }
        };

        self.bus.publish(&Event::order(update));
    }

    fn on_order_update(state: &Mutex<LedgerState>, update: &OrderUpdate) {
        let mut state = state.lock();
        let order = state
            .orders
            .entry(update.order_id.clone())
            .or_insert_with(|| {
                warn!(order_id = %update.order_id, "order event for unknown id; creating phantom record");
                Order::new(
                    update.order_id.clone(),
                    update.symbol.clone(),
                    update.side,
                    update.order_type,
                    update.price,
                    update.qty,
                )
            });
        order.apply_update(update);
    }

    fn on_fill(state: &Mutex<LedgerState>, report: &FillReport) {
        let mut state = state.lock();

        let order = state
            .orders
            .entry(report.order_id.clone())
            .or_insert_with(|| {
                warn!(order_id = %report.order_id, "fill for unknown order id; creating phantom record");
                Order::new(
                    report.order_id.clone(),
                    report.symbol.clone(),
                    report.side,
                    OrderType::Market,
                    report.fill_price,
                    report.fill_qty,
                )
            });
        order.apply_fill(report.fill_qty, report.fill_price);

        let position = state
            .positions
            .entry(report.symbol.clone())
            .or_insert_with(|| Position::new(report.symbol.clone()));
        position.apply_fill(report.side, report.fill_qty, report.fill_price);
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.state.lock().orders.get(order_id).cloned()
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    pub fn active_orders_for(&self, symbol: &str) -> Vec<Order> {
        self.state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active() && o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn active_order_count(&self) -> usize {
        self.state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active())
            .count()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().positions.get(symbol).cloned()
    }

    /// All non-flat positions.
    pub fn positions(&self) -> Vec<Position> {
        self.state
            .lock()
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.state
            .lock()
            .positions
            .values()
            .map(|p| p.realized_pnl)
            .sum()
    }

    /// Unrealized P&L summed over positions with a mark in `prices`;
    /// symbols without a mark are excluded.
    pub fn total_unrealized_pnl(&self, prices: &HashMap<String, f64>) -> f64 {
        self.state
            .lock()
            .positions
            .values()
            .filter_map(|p| prices.get(&p.symbol).map(|mark| p.unrealized_pnl(*mark)))
            .sum()
    }

    /// Drop all orders and positions. Intended for tests.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.orders.clear();
        state.positions.clear();
    }

    #[cfg(test)]
    pub(crate) fn fill_subscription(&self) -> SubscriptionId {
        self.fill_sub
    }
}

impl Drop for OrderLedger {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.order_sub);
        self.bus.unsubscribe(self.fill_sub);
    }
}
