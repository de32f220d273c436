//! Publish/subscribe event bus.
//!
//! The bus is an owned object: the engine root constructs one and hands
//! an `Arc` to every component. Dispatch is synchronous on the
//! publisher's thread; a FIFO queue with [`EventBus::drain`] covers
//! deferred side-channel work.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::events::{Event, EventKind};

/// Callback invoked with a shared reference to each matching event.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`]; monotonically
/// increasing, so registration order is comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<EventKind, Vec<Subscription>>,
    next_id: u64,
    event_count: u64,
    queue: VecDeque<Event>,
}

/// In-process publish/subscribe dispatcher with typed routing.
///
/// Handlers for a kind run in subscription order. The subscriber list is
/// snapshotted under the lock and the lock released before any handler
/// runs, so handlers may freely publish, subscribe, or unsubscribe; an
/// unsubscribe during dispatch affects future publishes only.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.entry(kind).or_default().push(Subscription {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription; unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        for subs in state.subscribers.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Synchronously invoke every handler subscribed for the event's kind.
    ///
    /// A panicking handler aborts only its own invocation; the remaining
    /// handlers in the snapshot still run.
    pub fn publish(&self, event: &Event) {
        let handlers: Vec<EventHandler> = {
            let mut state = self.state.lock();
            state.event_count += 1;
            state
                .subscribers
                .get(&event.kind())
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(kind = ?event.kind(), "event handler panicked; continuing with remaining handlers");
            }
        }
    }

    /// Store an event for deferred dispatch via [`EventBus::drain`].
    pub fn enqueue(&self, event: Event) {
        self.state.lock().queue.push_back(event);
    }

    /// Pop up to `max` queued events (0 = all) and dispatch each like
    /// [`EventBus::publish`]. Returns the number dispatched.
    pub fn drain(&self, max: usize) -> usize {
        let mut dispatched = 0;
        while max == 0 || dispatched < max {
            let next = self.state.lock().queue.pop_front();
            match next {
                Some(event) => {
                    self.publish(&event);
                    dispatched += 1;
                }
                None => break,
            }
        }
        dispatched
    }

    /// Total number of events dispatched.
    pub fn event_count(&self) -> u64 {
        self.state.lock().event_count
    }

    /// Number of events waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Drop all subscriptions and queued events, reset the counter.
    /// Intended for tests.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.subscribers.clear();
        state.queue.clear();
        state.event_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> impl Fn(&Event) + Send + Sync {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn delivers_to_every_subscriber_exactly_once() {
        let bus = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::MarketData, counting_handler(a.clone()));
        bus.subscribe(EventKind::MarketData, counting_handler(b.clone()));

        bus.publish(&Event::trade("AAPL", 150.0, 100));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(bus.event_count(), 1);
    }

    #[test]
    fn routes_by_kind_only() {
        let bus = EventBus::new();
        let market = Arc::new(AtomicUsize::new(0));
        let timer = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::MarketData, counting_handler(market.clone()));
        bus.subscribe(EventKind::Timer, counting_handler(timer.clone()));

        bus.publish(&Event::trade("AAPL", 150.0, 100));
        bus.publish(&Event::quote("AAPL", 149.9, 150.1, 10, 10));

        assert_eq!(market.load(Ordering::SeqCst), 2);
        assert_eq!(timer.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = log.clone();
            bus.subscribe(EventKind::System, move |_| log.lock().push(tag));
        }
        bus.publish(&Event::system(crate::events::SystemEventKind::Startup, ""));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(EventKind::MarketData, counting_handler(counter.clone()));

        bus.publish(&Event::trade("AAPL", 1.0, 1));
        bus.unsubscribe(id);
        bus.publish(&Event::trade("AAPL", 2.0, 1));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // Unknown id is a no-op.
        bus.unsubscribe(SubscriptionId(9999));
    }

    #[test]
    fn subscription_during_dispatch_misses_inflight_event() {
        let bus = Arc::new(EventBus::new());
        let late = Arc::new(AtomicUsize::new(0));
        {
            let bus = bus.clone();
            let late = late.clone();
            bus.clone().subscribe(EventKind::MarketData, move |_| {
                let late = late.clone();
                bus.subscribe(EventKind::MarketData, counting_handler(late));
            });
        }

        bus.publish(&Event::trade("AAPL", 1.0, 1));
        assert_eq!(late.load(Ordering::SeqCst), 0, "late subscriber must miss the in-flight event");

        bus.publish(&Event::trade("AAPL", 2.0, 1));
        assert_eq!(late.load(Ordering::SeqCst), 1, "late subscriber receives the next publish");
    }

    #[test]
    fn nested_publish_completes_before_outer_returns() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let bus = bus.clone();
            let log = log.clone();
            bus.clone().subscribe(EventKind::MarketData, move |event| {
                if let crate::events::EventPayload::Trade(t) = &event.payload {
                    log.lock().push(format!("trade:{}", t.price));
                    if t.price < 2.0 {
                        bus.publish(&Event::trade("AAPL", 2.0, 1));
                    }
                    log.lock().push(format!("done:{}", t.price));
                }
            });
        }

        bus.publish(&Event::trade("AAPL", 1.0, 1));
        // The nested dispatch is fully enclosed by the outer one.
        assert_eq!(*log.lock(), vec!["trade:1", "trade:2", "done:2", "done:1"]);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let after = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::MarketData, |_| panic!("boom"));
        bus.subscribe(EventKind::MarketData, counting_handler(after.clone()));

        bus.publish(&Event::trade("AAPL", 1.0, 1));
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_drain_respects_max() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::MarketData, counting_handler(counter.clone()));

        for i in 0..5 {
            bus.enqueue(Event::trade("AAPL", i as f64, 1));
        }
        assert_eq!(bus.queue_len(), 5);

        assert_eq!(bus.drain(2), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(bus.queue_len(), 3);

        // 0 drains everything that is left.
        assert_eq!(bus.drain(0), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::MarketData, counting_handler(counter.clone()));
        bus.enqueue(Event::trade("AAPL", 1.0, 1));
        bus.publish(&Event::trade("AAPL", 1.0, 1));

        bus.clear();
        assert_eq!(bus.event_count(), 0);
        assert_eq!(bus.queue_len(), 0);

        bus.publish(&Event::trade("AAPL", 2.0, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "subscription removed by clear");
    }
}
