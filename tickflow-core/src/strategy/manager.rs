//! Strategy manager — registry plus event fan-out.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{EventBus, SubscriptionId};
use crate::events::{Event, EventKind, EventPayload};
use crate::strategy::Strategy;

struct StrategyCell {
    name: String,
    strategy: Mutex<Box<dyn Strategy>>,
    /// Events that arrived while the strategy was executing a hook.
    /// A hook may publish, which re-enters this dispatcher on the same
    /// thread; deferral delivers the nested event after the hook returns
    /// instead of deadlocking on the strategy lock.
    deferred: Mutex<VecDeque<EventPayload>>,
}

struct ManagerShared {
    strategies: Mutex<Vec<Arc<StrategyCell>>>,
}

/// Handle to a registered strategy.
#[derive(Clone)]
pub struct StrategyHandle {
    cell: Arc<StrategyCell>,
}

impl StrategyHandle {
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Run a closure with exclusive access to the strategy.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Strategy) -> R) -> R {
        let mut guard = self.cell.strategy.lock();
        f(&mut **guard)
    }
}

/// Routes market data, order, and fill events to every running strategy
/// in registration order.
///
/// The registry is snapshotted before fan-out, so a strategy added
/// during dispatch is not invoked for the in-flight event, and
/// `add`/`remove` are legal from inside a hook.
pub struct StrategyManager {
    shared: Arc<ManagerShared>,
    bus: Arc<EventBus>,
    subs: [SubscriptionId; 3],
}

impl StrategyManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let shared = Arc::new(ManagerShared {
            strategies: Mutex::new(Vec::new()),
        });

        let subs = [EventKind::MarketData, EventKind::Order, EventKind::Fill].map(|kind| {
            let shared = shared.clone();
            bus.subscribe(kind, move |event| Self::dispatch(&shared, event))
        });

        Self { shared, bus, subs }
    }

    fn dispatch(shared: &ManagerShared, event: &Event) {
        let snapshot: Vec<Arc<StrategyCell>> = shared.strategies.lock().clone();
        for cell in snapshot {
            Self::deliver(&cell, &event.payload);
        }
    }

    fn deliver(cell: &StrategyCell, payload: &EventPayload) {
        match cell.strategy.try_lock() {
            Some(mut guard) => {
                if guard.is_running() {
                    Self::route(&mut **guard, payload);
                }
                // Drain anything a nested dispatch deferred while the
                // hook above was executing.
                loop {
                    let next = cell.deferred.lock().pop_front();
                    match next {
                        Some(deferred) => {
                            if guard.is_running() {
                                Self::route(&mut **guard, &deferred);
                            }
                        }
                        None => break,
                    }
                }
            }
            None => {
                // The strategy is mid-hook further down this call stack
                // (or busy on another thread); queue for the holder.
                cell.deferred.lock().push_back(payload.clone());
            }
        }
    }

    fn route(strategy: &mut dyn Strategy, payload: &EventPayload) {
        match payload {
            EventPayload::Trade(trade) => strategy.on_trade(trade),
            EventPayload::Quote(quote) => strategy.on_quote(quote),
            EventPayload::Order(update) => strategy.on_order(update),
            EventPayload::Fill(report) => strategy.on_fill(report),
            EventPayload::Timer(_) | EventPayload::System(_) => {}
        }
    }

    /// Register a strategy. It stays stopped until started explicitly or
    /// via [`StrategyManager::start_all`].
    pub fn add<S: Strategy + 'static>(&self, strategy: S) {
        let cell = Arc::new(StrategyCell {
            name: strategy.name().to_string(),
            strategy: Mutex::new(Box::new(strategy)),
            deferred: Mutex::new(VecDeque::new()),
        });
        self.shared.strategies.lock().push(cell);
    }

    /// Stop and deregister a strategy by name. Returns whether one was
    /// removed. A strategy removing itself from inside a hook is dropped
    /// without a final `on_stop`.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut strategies = self.shared.strategies.lock();
            match strategies.iter().position(|c| c.name == name) {
                Some(index) => Some(strategies.remove(index)),
                None => return false,
            }
        };
        if let Some(cell) = removed {
            if let Some(mut guard) = cell.strategy.try_lock() {
                guard.stop();
            }
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<StrategyHandle> {
        self.shared
            .strategies
            .lock()
            .iter()
            .find(|c| c.name == name)
            .map(|cell| StrategyHandle { cell: cell.clone() })
    }

    pub fn start_all(&self) {
        let snapshot: Vec<Arc<StrategyCell>> = self.shared.strategies.lock().clone();
        for cell in snapshot {
            cell.strategy.lock().start();
        }
    }

    pub fn stop_all(&self) {
        let snapshot: Vec<Arc<StrategyCell>> = self.shared.strategies.lock().clone();
        for cell in snapshot {
            cell.strategy.lock().stop();
        }
    }

    pub fn len(&self) -> usize {
        self.shared.strategies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.strategies.lock().is_empty()
    }
}

impl Drop for StrategyManager {
    fn drop(&mut self) {
        for sub in self.subs {
            self.bus.unsubscribe(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FillReport, OrderUpdate, Quote, Trade};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counts {
        trades: AtomicUsize,
        quotes: AtomicUsize,
        orders: AtomicUsize,
        fills: AtomicUsize,
    }

    struct Recorder {
        name: String,
        running: bool,
        counts: Arc<Counts>,
    }

    impl Recorder {
        fn new(name: &str, counts: Arc<Counts>) -> Self {
            Self {
                name: name.to_string(),
                running: false,
                counts,
            }
        }
    }

    impl Strategy for Recorder {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn start(&mut self) {
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn on_trade(&mut self, _: &Trade) {
            self.counts.trades.fetch_add(1, Ordering::SeqCst);
        }
        fn on_quote(&mut self, _: &Quote) {
            self.counts.quotes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_order(&mut self, _: &OrderUpdate) {
            self.counts.orders.fetch_add(1, Ordering::SeqCst);
        }
        fn on_fill(&mut self, _: &FillReport) {
            self.counts.fills.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn order_event() -> Event {
        Event::order(OrderUpdate {
            order_id: "o1".into(),
            symbol: "AAPL".into(),
            side: crate::domain::Side::Buy,
            order_type: crate::domain::OrderType::Market,
            status: crate::domain::OrderStatus::New,
            price: 150.0,
            qty: 100,
            filled_qty: 0,
            reject_reason: None,
        })
    }

    #[test]
    fn routes_by_variant_to_running_strategies() {
        let bus = Arc::new(EventBus::new());
        let manager = StrategyManager::new(bus.clone());
        let counts = Arc::new(Counts::default());
        manager.add(Recorder::new("rec", counts.clone()));
        manager.start_all();

        bus.publish(&Event::trade("AAPL", 150.0, 100));
        bus.publish(&Event::quote("AAPL", 149.9, 150.1, 10, 10));
        bus.publish(&order_event());
        bus.publish(&Event::fill(FillReport {
            order_id: "o1".into(),
            symbol: "AAPL".into(),
            side: crate::domain::Side::Buy,
            fill_price: 150.0,
            fill_qty: 100,
            execution_id: String::new(),
        }));

        assert_eq!(counts.trades.load(Ordering::SeqCst), 1);
        assert_eq!(counts.quotes.load(Ordering::SeqCst), 1);
        assert_eq!(counts.orders.load(Ordering::SeqCst), 1);
        assert_eq!(counts.fills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_strategies_see_nothing() {
        let bus = Arc::new(EventBus::new());
        let manager = StrategyManager::new(bus.clone());
        let counts = Arc::new(Counts::default());
        manager.add(Recorder::new("rec", counts.clone()));

        bus.publish(&Event::trade("AAPL", 150.0, 100));
        assert_eq!(counts.trades.load(Ordering::SeqCst), 0);

        manager.start_all();
        bus.publish(&Event::trade("AAPL", 151.0, 100));
        assert_eq!(counts.trades.load(Ordering::SeqCst), 1);

        manager.stop_all();
        bus.publish(&Event::trade("AAPL", 152.0, 100));
        assert_eq!(counts.trades.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_stops_the_strategy() {
        let bus = Arc::new(EventBus::new());
        let manager = StrategyManager::new(bus.clone());
        let counts = Arc::new(Counts::default());
        manager.add(Recorder::new("rec", counts.clone()));
        manager.start_all();

        assert!(manager.remove("rec"));
        assert!(!manager.remove("rec"));
        assert_eq!(manager.len(), 0);

        bus.publish(&Event::trade("AAPL", 150.0, 100));
        assert_eq!(counts.trades.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn get_finds_by_name() {
        let bus = Arc::new(EventBus::new());
        let manager = StrategyManager::new(bus.clone());
        manager.add(Recorder::new("alpha", Arc::new(Counts::default())));
        manager.add(Recorder::new("beta", Arc::new(Counts::default())));

        let handle = manager.get("beta").expect("registered");
        assert_eq!(handle.name(), "beta");
        assert!(!handle.with(|s| s.is_running()));
        assert!(manager.get("gamma").is_none());
    }

    /// A strategy that registers another strategy from inside a hook.
    struct Registrar {
        name: String,
        running: bool,
        manager: Arc<StrategyManager>,
        counts: Arc<Counts>,
        added: bool,
    }

    impl Strategy for Registrar {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn start(&mut self) {
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn on_trade(&mut self, _: &Trade) {
            if !self.added {
                self.added = true;
                let mut late = Recorder::new("late", self.counts.clone());
                late.start();
                self.manager.add(late);
            }
        }
    }

    #[test]
    fn strategy_added_during_dispatch_misses_inflight_event() {
        let bus = Arc::new(EventBus::new());
        let manager = Arc::new(StrategyManager::new(bus.clone()));
        let counts = Arc::new(Counts::default());

        let mut registrar = Registrar {
            name: "registrar".into(),
            running: false,
            manager: manager.clone(),
            counts: counts.clone(),
            added: false,
        };
        registrar.running = true;
        manager.add(registrar);

        bus.publish(&Event::trade("AAPL", 150.0, 100));
        assert_eq!(manager.len(), 2);
        assert_eq!(
            counts.trades.load(Ordering::SeqCst),
            0,
            "late strategy must not see the event that registered it"
        );

        bus.publish(&Event::trade("AAPL", 151.0, 100));
        assert_eq!(counts.trades.load(Ordering::SeqCst), 1);
    }

    /// A strategy that publishes from inside a hook, forcing reentrant
    /// dispatch into itself.
    struct Republisher {
        name: String,
        running: bool,
        bus: Arc<EventBus>,
        trades_seen: Arc<AtomicUsize>,
    }

    impl Strategy for Republisher {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn start(&mut self) {
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn on_trade(&mut self, trade: &Trade) {
            self.trades_seen.fetch_add(1, Ordering::SeqCst);
            if trade.price < 2.0 {
                self.bus.publish(&Event::trade("AAPL", 2.0, 1));
            }
        }
    }

    #[test]
    fn reentrant_publish_is_deferred_not_deadlocked() {
        let bus = Arc::new(EventBus::new());
        let manager = StrategyManager::new(bus.clone());
        let trades_seen = Arc::new(AtomicUsize::new(0));
        manager.add(Republisher {
            name: "repub".into(),
            running: true,
            bus: bus.clone(),
            trades_seen: trades_seen.clone(),
        });

        bus.publish(&Event::trade("AAPL", 1.0, 1));

        // Both the original and the nested trade were delivered, the
        // nested one after the outer hook returned.
        assert_eq!(trades_seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.event_count(), 2);
    }
}
