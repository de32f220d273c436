//! Backtest driver — replays a historical trade log through the engine.
//!
//! The driver owns the bus, a portfolio, a deterministic venue, and the
//! strategy manager. Replay publishes one `Trade` event per tick and
//! snapshots the portfolio after each step; with instant fills and zero
//! randomness the whole pipeline settles synchronously before the
//! snapshot is taken.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use tickflow_core::bus::EventBus;
use tickflow_core::events::Event;
use tickflow_core::portfolio::Portfolio;
use tickflow_core::strategy::{Strategy, StrategyManager};
use tickflow_core::venue::{SimulatedVenue, VenueConfig};

use crate::data::{self, DataError, TradeTick};
use crate::metrics::{BacktestReport, PortfolioSnapshot, DEFAULT_RISK_FREE_RATE};

/// Failures configuring or running a backtest.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("no historical data loaded")]
    NoData,
    #[error("no strategies added")]
    NoStrategies,
    #[error("no data left after applying filters")]
    EmptyAfterFilters,
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Replays historical trades and collects per-step snapshots.
pub struct Backtester {
    initial_capital: f64,
    bus: Arc<EventBus>,
    portfolio: Arc<Portfolio>,
    venue: SimulatedVenue,
    manager: StrategyManager,
    data: Vec<TradeTick>,
    snapshots: Vec<PortfolioSnapshot>,
    time_range: Option<(i64, i64)>,
    symbols: Vec<String>,
    risk_free_rate: f64,
}

impl Backtester {
    pub fn new(initial_capital: f64) -> Self {
        let bus = Arc::new(EventBus::new());
        let portfolio = Arc::new(Portfolio::new(bus.clone(), initial_capital));
        let venue = SimulatedVenue::new(bus.clone(), VenueConfig::deterministic());
        let manager = StrategyManager::new(bus.clone());
        Self {
            initial_capital,
            bus,
            portfolio,
            venue,
            manager,
            data: Vec::new(),
            snapshots: Vec::new(),
            time_range: None,
            symbols: Vec::new(),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }

    /// The portfolio strategies should be constructed against.
    pub fn portfolio(&self) -> Arc<Portfolio> {
        self.portfolio.clone()
    }

    pub fn add_strategy<S: Strategy + 'static>(&self, strategy: S) {
        self.manager.add(strategy);
    }

    /// Load the trade log from a CSV file.
    pub fn load_csv(&mut self, path: impl AsRef<Path>) -> Result<(), BacktestError> {
        self.data = data::load_csv(path)?;
        Ok(())
    }

    /// Use a pre-built trade log; sorted by timestamp before replay.
    pub fn load_ticks(&mut self, mut ticks: Vec<TradeTick>) {
        data::sort_by_timestamp(&mut ticks);
        self.data = ticks;
    }

    /// Restrict replay to `start <= ts <= end`, inclusive.
    pub fn set_time_range(&mut self, start_ms: i64, end_ms: i64) {
        self.time_range = Some((start_ms, end_ms));
    }

    /// Restrict replay to the given symbols.
    pub fn set_symbols<I, S>(&mut self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub fn set_risk_free_rate(&mut self, annual_rate: f64) {
        self.risk_free_rate = annual_rate;
    }

    /// Run the replay and compute the report.
    pub fn run(&mut self) -> Result<BacktestReport, BacktestError> {
        if self.data.is_empty() {
            return Err(BacktestError::NoData);
        }
        if self.manager.is_empty() {
            return Err(BacktestError::NoStrategies);
        }

        let replay = self.filtered_data()?;
        info!(ticks = replay.len(), "starting backtest replay");

        self.snapshots.clear();
        self.venue.start();
        self.manager.start_all();

        // Last seen price per symbol; the marks used for every snapshot.
        let mut last_prices: HashMap<String, f64> = HashMap::new();

        self.take_snapshot(replay[0].timestamp_ms, &last_prices);

        for tick in &replay {
            self.venue.set_mark(&tick.symbol, tick.price);
            self.bus
                .publish(&Event::trade(tick.symbol.clone(), tick.price, tick.volume));
            last_prices.insert(tick.symbol.clone(), tick.price);
            self.take_snapshot(tick.timestamp_ms, &last_prices);
        }

        self.manager.stop_all();
        self.venue.stop();

        let report = BacktestReport::from_snapshots(
            &self.snapshots,
            self.initial_capital,
            self.risk_free_rate,
        );
        info!(
            total_return = report.total_return,
            trades = report.total_trades,
            "backtest complete"
        );
        Ok(report)
    }

    fn filtered_data(&self) -> Result<Vec<TradeTick>, BacktestError> {
        let mut replay = self.data.clone();
        if let Some((start, end)) = self.time_range {
            replay = data::filter_by_time_range(&replay, start, end);
        }
        if !self.symbols.is_empty() {
            replay.retain(|t| self.symbols.iter().any(|s| s == &t.symbol));
            data::sort_by_timestamp(&mut replay);
        }
        if replay.is_empty() {
            return Err(BacktestError::EmptyAfterFilters);
        }
        Ok(replay)
    }

    fn take_snapshot(&mut self, timestamp_ms: i64, marks: &HashMap<String, f64>) {
        self.snapshots.push(PortfolioSnapshot {
            timestamp_ms,
            portfolio_value: self.portfolio.portfolio_value(marks),
            cash: self.portfolio.cash(),
            realized_pnl: self.portfolio.realized_pnl(),
            unrealized_pnl: self.portfolio.unrealized_pnl(marks),
        });
    }

    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    /// Tear down and rebuild the engine for a fresh run.
    ///
    /// Strategies hold handles to the previous portfolio, so they are
    /// discarded too; re-add them after a reset.
    pub fn reset(&mut self) {
        let bus = Arc::new(EventBus::new());
        self.portfolio = Arc::new(Portfolio::new(bus.clone(), self.initial_capital));
        self.venue = SimulatedVenue::new(bus.clone(), VenueConfig::deterministic());
        self.manager = StrategyManager::new(bus.clone());
        self.bus = bus;
        self.data.clear();
        self.snapshots.clear();
        self.time_range = None;
        self.symbols.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_core::strategy::SmaCrossover;

    fn tick(ts: i64, symbol: &str, price: f64) -> TradeTick {
        TradeTick {
            timestamp_ms: ts,
            symbol: symbol.into(),
            price,
            volume: 100,
        }
    }

    fn sma_backtester(prices: &[f64]) -> Backtester {
        let mut backtester = Backtester::new(1_000_000.0);
        let strategy =
            SmaCrossover::new("sma", backtester.portfolio(), "AAPL", 2, 3, 100);
        backtester.add_strategy(strategy);
        let ticks: Vec<TradeTick> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| tick(i as i64 * 1_000, "AAPL", *p))
            .collect();
        backtester.load_ticks(ticks);
        backtester
    }

    #[test]
    fn run_without_data_fails() {
        let mut backtester = Backtester::new(1_000_000.0);
        let strategy = SmaCrossover::new("sma", backtester.portfolio(), "AAPL", 2, 3, 100);
        backtester.add_strategy(strategy);
        assert!(matches!(backtester.run(), Err(BacktestError::NoData)));
    }

    #[test]
    fn run_without_strategies_fails() {
        let mut backtester = Backtester::new(1_000_000.0);
        backtester.load_ticks(vec![tick(0, "AAPL", 100.0)]);
        assert!(matches!(backtester.run(), Err(BacktestError::NoStrategies)));
    }

    #[test]
    fn filters_can_empty_the_replay() {
        let mut backtester = sma_backtester(&[100.0, 101.0]);
        backtester.set_time_range(10_000, 20_000);
        assert!(matches!(
            backtester.run(),
            Err(BacktestError::EmptyAfterFilters)
        ));
    }

    #[test]
    fn snapshot_per_tick_plus_initial() {
        let mut backtester = sma_backtester(&[100.0, 99.0, 98.0]);
        backtester.run().unwrap();
        assert_eq!(backtester.snapshots().len(), 4);
        let first = &backtester.snapshots()[0];
        assert_eq!(first.timestamp_ms, 0);
        assert_eq!(first.portfolio_value, 1_000_000.0);
        assert_eq!(first.cash, 1_000_000.0);
    }

    #[test]
    fn golden_cross_produces_position() {
        // Prices [100, 99, 98, 100, 102]: cross fires on the last tick.
        let mut backtester = sma_backtester(&[100.0, 99.0, 98.0, 100.0, 102.0]);
        backtester.run().unwrap();

        let portfolio = backtester.portfolio();
        let position = portfolio.ledger().position("AAPL").expect("long position");
        assert_eq!(position.qty, 100);
        // Zero slippage: filled at the 102 mark.
        assert!((portfolio.cash() - (1_000_000.0 - 102.0 * 100.0)).abs() < 1e-2);
    }

    #[test]
    fn symbol_filter_restricts_replay() {
        let mut backtester = Backtester::new(1_000_000.0);
        let strategy = SmaCrossover::new("sma", backtester.portfolio(), "AAPL", 2, 3, 100);
        backtester.add_strategy(strategy);
        backtester.load_ticks(vec![
            tick(0, "AAPL", 100.0),
            tick(1_000, "MSFT", 300.0),
            tick(2_000, "AAPL", 101.0),
        ]);
        backtester.set_symbols(["AAPL"]);
        backtester.run().unwrap();
        // Initial + two AAPL ticks.
        assert_eq!(backtester.snapshots().len(), 3);
    }

    #[test]
    fn time_range_is_inclusive() {
        let mut backtester = sma_backtester(&[100.0, 101.0, 102.0, 103.0]);
        backtester.set_time_range(1_000, 2_000);
        backtester.run().unwrap();
        // Initial + ticks at 1000 and 2000.
        assert_eq!(backtester.snapshots().len(), 3);
    }

    #[test]
    fn reset_requires_new_strategies() {
        let mut backtester = sma_backtester(&[100.0, 99.0, 98.0, 100.0, 102.0]);
        backtester.run().unwrap();
        assert!(!backtester.snapshots().is_empty());

        backtester.reset();
        assert!(backtester.snapshots().is_empty());
        assert!(matches!(backtester.run(), Err(BacktestError::NoData)));

        let strategy = SmaCrossover::new("sma", backtester.portfolio(), "AAPL", 2, 3, 100);
        backtester.add_strategy(strategy);
        backtester.load_ticks(vec![tick(0, "AAPL", 100.0)]);
        backtester.run().unwrap();
        assert_eq!(backtester.portfolio().cash(), 1_000_000.0);
    }
}
