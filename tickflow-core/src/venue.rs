//! Simulated venue — accepts orders from the bus and produces fills.
//!
//! Simulates acceptance/rejection, fill latency, partial fills, and
//! market-order slippage. Backtests configure instant fills with zero
//! rejection, partial, and slippage rates, which makes the venue fully
//! deterministic despite the RNG.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::bus::{EventBus, SubscriptionId};
use crate::config::Config;
use crate::domain::{OrderStatus, OrderType, Side};
use crate::events::{Event, EventKind, EventPayload, FillReport, OrderUpdate};

pub const DEFAULT_FILL_LATENCY_MS: u64 = 10;
pub const DEFAULT_SLIPPAGE_BPS: f64 = 5.0;

/// Simulation behavior knobs.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    /// Delay before a scheduled fill is processed.
    pub fill_latency_ms: u64,
    /// Bernoulli probability of rejecting a submit.
    pub rejection_rate: f64,
    /// Bernoulli probability of splitting a fill in two.
    pub partial_fill_rate: f64,
    /// Market-order slip applied against the taker.
    pub slippage_bps: f64,
    /// Process fills inline on the submitting thread.
    pub instant_fills: bool,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            fill_latency_ms: DEFAULT_FILL_LATENCY_MS,
            rejection_rate: 0.0,
            partial_fill_rate: 0.0,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            instant_fills: false,
        }
    }
}

impl VenueConfig {
    /// Read `exchange.*` keys, falling back to defaults.
    pub fn from_config(config: &Config) -> Self {
        Self {
            fill_latency_ms: config.get_i64("exchange.fill_latency_ms", DEFAULT_FILL_LATENCY_MS as i64)
                .max(0) as u64,
            rejection_rate: config.get_f64("exchange.rejection_rate", 0.0),
            partial_fill_rate: config.get_f64("exchange.partial_fill_rate", 0.0),
            slippage_bps: config.get_f64("exchange.slippage_bps", DEFAULT_SLIPPAGE_BPS),
            instant_fills: config.get_bool("exchange.instant_fills", false),
        }
    }

    /// Inline fills, zero randomness, zero slippage. The backtest
    /// driver uses this so replays are reproducible.
    pub fn deterministic() -> Self {
        Self {
            fill_latency_ms: 0,
            rejection_rate: 0.0,
            partial_fill_rate: 0.0,
            slippage_bps: 0.0,
            instant_fills: true,
        }
    }
}

struct PendingOrder {
    symbol: String,
    side: Side,
    order_type: OrderType,
    price: f64,
    qty: i64,
}

struct VenueInner {
    config: VenueConfig,
    running: AtomicBool,
    rng: Mutex<StdRng>,
    marks: Mutex<HashMap<String, f64>>,
    pending: Mutex<HashMap<String, PendingOrder>>,
    execution_seq: AtomicU64,
    bus: Arc<EventBus>,
}

/// Exchange simulator driven by `Order` events.
///
/// Consumes `PendingNew` and `PendingCancel`; produces `New`, `Filled`,
/// `PartiallyFilled`, `Rejected`, `Cancelled`, and `Fill` events.
pub struct SimulatedVenue {
    inner: Arc<VenueInner>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl SimulatedVenue {
    pub fn new(bus: Arc<EventBus>, config: VenueConfig) -> Self {
        Self {
            inner: Arc::new(VenueInner {
                config,
                running: AtomicBool::new(false),
                rng: Mutex::new(StdRng::from_entropy()),
                marks: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                execution_seq: AtomicU64::new(0),
                bus,
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to order flow. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let sub = self.inner.bus.subscribe(EventKind::Order, move |event| {
            if let EventPayload::Order(update) = &event.payload {
                Self::on_order_event(&inner, update);
            }
        });
        *self.subscription.lock() = Some(sub);
    }

    /// Unsubscribe and drop late worker fills. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(sub) = self.subscription.lock().take() {
            self.inner.bus.unsubscribe(sub);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Record the current market price for a symbol; market-order
    /// slippage is applied against this mark.
    pub fn set_mark(&self, symbol: &str, price: f64) {
        self.inner.marks.lock().insert(symbol.to_string(), price);
    }

    pub fn config(&self) -> &VenueConfig {
        &self.inner.config
    }

    fn on_order_event(inner: &Arc<VenueInner>, update: &OrderUpdate) {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        match update.status {
            OrderStatus::PendingNew => Self::handle_submit(inner, update),
            OrderStatus::PendingCancel => Self::handle_cancel(inner, &update.order_id),
            _ => {}
        }
    }

    fn handle_submit(inner: &Arc<VenueInner>, update: &OrderUpdate) {
        if Self::draw(inner) < inner.config.rejection_rate {
            inner.bus.publish(&Event::order(OrderUpdate {
                status: OrderStatus::Rejected,
                filled_qty: 0,
                reject_reason: Some("rejected by venue".to_string()),
                ..update.clone()
            }));
            return;
        }

        inner.bus.publish(&Event::order(OrderUpdate {
            status: OrderStatus::New,
            filled_qty: 0,
            reject_reason: None,
            ..update.clone()
        }));

        inner.pending.lock().insert(
            update.order_id.clone(),
            PendingOrder {
                symbol: update.symbol.clone(),
                side: update.side,
                order_type: update.order_type,
                price: update.price,
                qty: update.qty,
            },
        );

        if inner.config.instant_fills {
            Self::process_fill(inner, update.order_id.clone());
        } else {
            let inner = inner.clone();
            let order_id = update.order_id.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(inner.config.fill_latency_ms));
                if inner.running.load(Ordering::SeqCst) {
                    SimulatedVenue::process_fill(&inner, order_id);
                }
            });
        }
    }

    fn handle_cancel(inner: &Arc<VenueInner>, order_id: &str) {
        let pending = inner.pending.lock().remove(order_id);
        match pending {
            Some(order) => {
                inner.bus.publish(&Event::order(OrderUpdate {
                    order_id: order_id.to_string(),
                    symbol: order.symbol,
                    side: order.side,
                    order_type: order.order_type,
                    status: OrderStatus::Cancelled,
                    price: order.price,
                    qty: order.qty,
                    filled_qty: 0,
                    reject_reason: None,
                }));
            }
            None => {
                // The order already filled and was dequeued: benign race.
                debug!(order_id, "cancel ignored; order no longer pending");
            }
        }
    }

    /// Emit the fill sequence for a pending order: one or two `Fill`
    /// events plus the matching status updates, always concluding with
    /// `Filled` at full quantity.
    fn process_fill(inner: &Arc<VenueInner>, order_id: String) {
        let Some(order) = inner.pending.lock().remove(&order_id) else {
            return;
        };

        let fill_price = if order.order_type == OrderType::Market {
            Self::slipped_price(inner, &order.symbol, order.side, order.price)
        } else {
            order.price
        };

        let partial = Self::draw(inner) < inner.config.partial_fill_rate;
        let first_qty = if partial {
            let fraction = inner.rng.lock().gen_range(0.5..0.9);
            ((order.qty as f64 * fraction) as i64).max(1)
        } else {
            order.qty
        };

        if first_qty < order.qty {
            Self::publish_fill(inner, &order_id, &order, fill_price, first_qty);
            inner.bus.publish(&Event::order(OrderUpdate {
                order_id: order_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                order_type: order.order_type,
                status: OrderStatus::PartiallyFilled,
                price: order.price,
                qty: order.qty,
                filled_qty: first_qty,
                reject_reason: None,
            }));

            if !inner.config.instant_fills {
                std::thread::sleep(Duration::from_millis(inner.config.fill_latency_ms));
            }
            if inner.running.load(Ordering::SeqCst) {
                Self::publish_fill(inner, &order_id, &order, fill_price, order.qty - first_qty);
            }
        } else {
            Self::publish_fill(inner, &order_id, &order, fill_price, order.qty);
        }

        inner.bus.publish(&Event::order(OrderUpdate {
            order_id,
            symbol: order.symbol,
            side: order.side,
            order_type: order.order_type,
            status: OrderStatus::Filled,
            price: order.price,
            qty: order.qty,
            filled_qty: order.qty,
            reject_reason: None,
        }));
    }

    fn publish_fill(
        inner: &Arc<VenueInner>,
        order_id: &str,
        order: &PendingOrder,
        fill_price: f64,
        fill_qty: i64,
    ) {
        let seq = inner.execution_seq.fetch_add(1, Ordering::SeqCst) + 1;
        inner.bus.publish(&Event::fill(FillReport {
            order_id: order_id.to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            fill_qty,
            execution_id: format!("EXEC-{seq}"),
        }));
    }

    /// Slip off the last mark (or the order price without one): buys pay
    /// more, sells receive less.
    fn slipped_price(inner: &VenueInner, symbol: &str, side: Side, order_price: f64) -> f64 {
        let base = inner
            .marks
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or(order_price);
        let factor = inner.config.slippage_bps / 10_000.0;
        match side {
            Side::Buy => base * (1.0 + factor),
            Side::Sell => base * (1.0 - factor),
        }
    }

    fn draw(inner: &VenueInner) -> f64 {
        inner.rng.lock().gen::<f64>()
    }
}

impl Drop for SimulatedVenue {
    fn drop(&mut self) {
        self.stop();
    }
}
