//! Portfolio — cash tracking and the pre-trade risk gate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::bus::{EventBus, SubscriptionId};
use crate::config::Config;
use crate::domain::{OrderType, Side};
use crate::events::{EventKind, EventPayload};
use crate::ledger::OrderLedger;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 1_000_000.0;
pub const DEFAULT_MAX_POSITION_NOTIONAL: f64 = 1_000_000.0;
pub const DEFAULT_MAX_GROSS_EXPOSURE: f64 = 5_000_000.0;

struct CashState {
    cash: f64,
    max_position_notional: f64,
    max_gross_exposure: f64,
}

/// Wraps the ledger with capital tracking and risk limits.
///
/// All pre-trade checks run atomically under one lock together with the
/// observation of current positions; splitting them would admit two
/// orders that individually pass and jointly exceed a cap.
///
/// Subscription order matters: the ledger registers its `Fill` handler
/// before the portfolio's, so the position is updated before cash when a
/// fill dispatches.
pub struct Portfolio {
    initial_capital: f64,
    state: Arc<Mutex<CashState>>,
    ledger: OrderLedger,
    bus: Arc<EventBus>,
    fill_sub: SubscriptionId,
}

impl Portfolio {
    pub fn new(bus: Arc<EventBus>, initial_capital: f64) -> Self {
        Self::with_limits(
            bus,
            initial_capital,
            DEFAULT_MAX_POSITION_NOTIONAL,
            DEFAULT_MAX_GROSS_EXPOSURE,
        )
    }

    /// Build a portfolio from `portfolio.*` config keys.
    pub fn from_config(bus: Arc<EventBus>, config: &Config) -> Self {
        Self::with_limits(
            bus,
            config.get_f64("portfolio.initial_capital", DEFAULT_INITIAL_CAPITAL),
            config.get_f64("portfolio.max_position_size", DEFAULT_MAX_POSITION_NOTIONAL),
            config.get_f64("portfolio.max_portfolio_exposure", DEFAULT_MAX_GROSS_EXPOSURE),
        )
    }

    pub fn with_limits(
        bus: Arc<EventBus>,
        initial_capital: f64,
        max_position_notional: f64,
        max_gross_exposure: f64,
    ) -> Self {
        // The ledger must subscribe first: positions update before cash.
        let ledger = OrderLedger::new(bus.clone());

        let state = Arc::new(Mutex::new(CashState {
            cash: initial_capital,
            max_position_notional,
            max_gross_exposure,
        }));

        let fill_state = state.clone();
        let fill_sub = bus.subscribe(EventKind::Fill, move |event| {
            if let EventPayload::Fill(report) = &event.payload {
                let value = report.fill_price * report.fill_qty as f64;
                let mut state = fill_state.lock();
                match report.side {
                    Side::Buy => state.cash -= value,
                    Side::Sell => state.cash += value,
                }
            }
        });

        Self {
            initial_capital,
            state,
            ledger,
            bus,
            fill_sub,
        }
    }

    /// Submit an order through the pre-trade gate.
    ///
    /// Returns `false` (and publishes nothing) when any check fails; on
    /// pass the order reaches the ledger, which publishes `PendingNew`.
    /// `marks` supplies per-symbol prices for the exposure computation;
    /// symbols without a mark are excluded from the gross sum.
    pub fn submit_order(
        &self,
        order_id: &str,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        price: f64,
        qty: i64,
        marks: &HashMap<String, f64>,
    ) -> bool {
        {
            let state = self.state.lock();
            if !self.pre_trade_check(&state, symbol, side, price, qty, marks) {
                return false;
            }
        }

        self.ledger
            .submit_order(order_id, symbol, side, order_type, price, qty);
        true
    }

    /// Checks run in order, fail-closed: cash sufficiency (buys only),
    /// per-symbol notional cap, then the gross exposure cap.
    fn pre_trade_check(
        &self,
        state: &CashState,
        symbol: &str,
        side: Side,
        price: f64,
        qty: i64,
        marks: &HashMap<String, f64>,
    ) -> bool {
        let order_value = price * qty as f64;
        if side == Side::Buy && order_value > state.cash {
            debug!(symbol, order_value, cash = state.cash, "order rejected: insufficient cash");
            return false;
        }

        let current_qty = self.ledger.position(symbol).map(|p| p.qty).unwrap_or(0);
        let projected_qty = current_qty + side.sign() * qty;
        let projected_notional = projected_qty.abs() as f64 * price;
        if projected_notional > state.max_position_notional {
            debug!(
                symbol,
                projected_notional,
                cap = state.max_position_notional,
                "order rejected: position notional cap"
            );
            return false;
        }

        let mut exposure = 0.0;
        for position in self.ledger.positions() {
            if position.symbol == symbol {
                continue;
            }
            if let Some(mark) = marks.get(&position.symbol) {
                exposure += position.qty.abs() as f64 * mark;
            }
        }
        if exposure + projected_notional > state.max_gross_exposure {
            debug!(
                symbol,
                projected = exposure + projected_notional,
                cap = state.max_gross_exposure,
                "order rejected: gross exposure cap"
            );
            return false;
        }

        true
    }

    pub fn cancel_order(&self, order_id: &str) {
        self.ledger.cancel_order(order_id);
    }

    pub fn cash(&self) -> f64 {
        self.state.lock().cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Cash plus unrealized P&L under the given marks.
    pub fn portfolio_value(&self, marks: &HashMap<String, f64>) -> f64 {
        self.cash() + self.ledger.total_unrealized_pnl(marks)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.ledger.total_realized_pnl()
    }

    pub fn unrealized_pnl(&self, marks: &HashMap<String, f64>) -> f64 {
        self.ledger.total_unrealized_pnl(marks)
    }

    pub fn total_pnl(&self, marks: &HashMap<String, f64>) -> f64 {
        self.realized_pnl() + self.unrealized_pnl(marks)
    }

    /// Sum of absolute position values under the given marks.
    pub fn gross_exposure(&self, marks: &HashMap<String, f64>) -> f64 {
        self.ledger
            .positions()
            .iter()
            .filter_map(|p| marks.get(&p.symbol).map(|m| p.qty.abs() as f64 * m))
            .sum()
    }

    /// Sum of signed position values under the given marks.
    pub fn net_exposure(&self, marks: &HashMap<String, f64>) -> f64 {
        self.ledger
            .positions()
            .iter()
            .filter_map(|p| marks.get(&p.symbol).map(|m| p.qty as f64 * m))
            .sum()
    }

    pub fn max_position_notional(&self) -> f64 {
        self.state.lock().max_position_notional
    }

    pub fn set_max_position_notional(&self, cap: f64) {
        self.state.lock().max_position_notional = cap;
    }

    pub fn max_gross_exposure(&self) -> f64 {
        self.state.lock().max_gross_exposure
    }

    pub fn set_max_gross_exposure(&self, cap: f64) {
        self.state.lock().max_gross_exposure = cap;
    }

    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    /// Reset cash to the initial capital and clear the ledger. Tests only.
    pub fn clear(&self) {
        self.state.lock().cash = self.initial_capital;
        self.ledger.clear();
    }

    #[cfg(test)]
    pub(crate) fn fill_subscription(&self) -> SubscriptionId {
        self.fill_sub
    }
}

impl Drop for Portfolio {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.fill_sub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, FillReport};

    const TOL: f64 = 1e-2;

    fn fill(order_id: &str, symbol: &str, side: Side, price: f64, qty: i64) -> Event {
        Event::fill(FillReport {
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            fill_price: price,
            fill_qty: qty,
            execution_id: String::new(),
        })
    }

    fn marks(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[test]
    fn fills_adjust_cash() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 100_000.0);

        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 100));
        assert!((portfolio.cash() - 85_000.0).abs() < TOL);

        bus.publish(&fill("o2", "AAPL", Side::Sell, 160.0, 50));
        assert!((portfolio.cash() - 93_000.0).abs() < TOL);
    }

    #[test]
    fn round_trip_scenario() {
        // Buy 100 @ 150, mark to 160, sell 50 @ 160.
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 100_000.0);

        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 100));
        let m = marks(&[("AAPL", 160.0)]);
        assert!((portfolio.unrealized_pnl(&m) - 1_000.0).abs() < TOL);

        bus.publish(&fill("o2", "AAPL", Side::Sell, 160.0, 50));
        assert!((portfolio.realized_pnl() - 500.0).abs() < TOL);
        assert!((portfolio.unrealized_pnl(&m) - 500.0).abs() < TOL);
        assert!((portfolio.total_pnl(&m) - 1_000.0).abs() < TOL);
        assert!((portfolio.cash() - 93_000.0).abs() < TOL);
        assert!((portfolio.portfolio_value(&m) - 93_500.0).abs() < TOL);
    }

    #[test]
    fn ledger_fill_handler_registers_before_portfolio() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 100_000.0);
        assert!(
            portfolio.ledger().fill_subscription() < portfolio.fill_subscription(),
            "positions must update before cash on the same fill"
        );
    }

    #[test]
    fn insufficient_cash_rejects_buy() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 10_000.0);
        let m = marks(&[("AAPL", 150.0)]);

        assert!(!portfolio.submit_order("o1", "AAPL", Side::Buy, OrderType::Market, 150.0, 100, &m));
        // A sell of the same notional passes the cash check.
        assert!(portfolio.submit_order("o2", "AAPL", Side::Sell, OrderType::Market, 150.0, 100, &m));
        // No event was raised for the rejection.
        assert!(portfolio.ledger().order("o1").is_none());
    }

    #[test]
    fn position_notional_cap_rejects_oversized_orders() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::with_limits(bus.clone(), 1_000_000.0, 20_000.0, 5_000_000.0);
        let m = marks(&[("AAPL", 150.0)]);

        // 150 * 150 = 22,500 notional: over the per-symbol cap.
        assert!(!portfolio.submit_order("o1", "AAPL", Side::Buy, OrderType::Limit, 150.0, 150, &m));
        // 100 * 150 = 15,000: admitted.
        assert!(portfolio.submit_order("o2", "AAPL", Side::Buy, OrderType::Limit, 150.0, 100, &m));
    }

    #[test]
    fn gross_exposure_cap_counts_other_symbols() {
        // Per-symbol cap loose (100k), gross cap 50k.
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::with_limits(bus.clone(), 1_000_000.0, 100_000.0, 50_000.0);
        let m = marks(&[("AAPL", 150.0), ("GOOGL", 2_800.0)]);

        // 200 * 150 = 30,000 gross: admitted and filled.
        assert!(portfolio.submit_order("o1", "AAPL", Side::Buy, OrderType::Limit, 150.0, 200, &m));
        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 200));

        // 10 * 2800 = 28,000 would take gross to 58,000: rejected.
        assert!(!portfolio.submit_order("o2", "GOOGL", Side::Buy, OrderType::Limit, 2_800.0, 10, &m));

        // 5 * 2800 = 14,000 takes gross to 44,000: admitted.
        assert!(portfolio.submit_order("o3", "GOOGL", Side::Buy, OrderType::Limit, 2_800.0, 5, &m));
    }

    #[test]
    fn projected_position_drives_the_notional_check() {
        // Selling out of a long is always risk-reducing under the cap.
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::with_limits(bus.clone(), 1_000_000.0, 20_000.0, 5_000_000.0);
        let m = marks(&[("AAPL", 150.0)]);

        assert!(portfolio.submit_order("o1", "AAPL", Side::Buy, OrderType::Limit, 150.0, 100, &m));
        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 100));

        // Another 100 would project to 200 * 150 = 30,000: rejected.
        assert!(!portfolio.submit_order("o2", "AAPL", Side::Buy, OrderType::Limit, 150.0, 100, &m));
        // Selling 100 projects to flat: admitted.
        assert!(portfolio.submit_order("o3", "AAPL", Side::Sell, OrderType::Limit, 150.0, 100, &m));
    }

    #[test]
    fn admitting_order_bounds_exposure_growth() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::with_limits(bus.clone(), 1_000_000.0, 500_000.0, 500_000.0);
        let m = marks(&[("AAPL", 100.0)]);

        let before = portfolio.gross_exposure(&m);
        let notional = 100.0 * 50.0;
        assert!(portfolio.submit_order("o1", "AAPL", Side::Buy, OrderType::Market, 100.0, 50, &m));
        bus.publish(&fill("o1", "AAPL", Side::Buy, 100.0, 50));
        let after = portfolio.gross_exposure(&m);
        assert!(after <= before + notional + TOL);
    }

    #[test]
    fn exposure_ignores_symbols_without_marks() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 1_000_000.0);
        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 100));
        bus.publish(&fill("o2", "MSFT", Side::Sell, 300.0, 50));

        let m = marks(&[("AAPL", 150.0)]);
        assert!((portfolio.gross_exposure(&m) - 15_000.0).abs() < TOL);
        assert!((portfolio.net_exposure(&m) - 15_000.0).abs() < TOL);

        let both = marks(&[("AAPL", 150.0), ("MSFT", 300.0)]);
        assert!((portfolio.gross_exposure(&both) - 30_000.0).abs() < TOL);
        assert!((portfolio.net_exposure(&both) - 0.0).abs() < TOL);
    }

    #[test]
    fn cash_conservation_after_flat() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 100_000.0);

        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 100));
        bus.publish(&fill("o2", "AAPL", Side::Sell, 160.0, 100));
        bus.publish(&fill("o3", "MSFT", Side::Sell, 300.0, 20));
        bus.publish(&fill("o4", "MSFT", Side::Buy, 290.0, 20));

        // All flat: cash equals initial capital plus realized P&L.
        assert!(portfolio.ledger().positions().is_empty());
        let expected = 100_000.0 + portfolio.realized_pnl();
        assert!((portfolio.cash() - expected).abs() < TOL);
    }

    #[test]
    fn clear_resets_cash_and_ledger() {
        let bus = Arc::new(EventBus::new());
        let portfolio = Portfolio::new(bus.clone(), 100_000.0);
        bus.publish(&fill("o1", "AAPL", Side::Buy, 150.0, 100));
        portfolio.clear();
        assert!((portfolio.cash() - 100_000.0).abs() < TOL);
        assert!(portfolio.ledger().position("AAPL").is_none());
    }
}
