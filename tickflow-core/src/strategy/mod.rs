//! Strategy runtime — the trait every trading strategy implements and
//! the manager that fans events out to them.

pub mod manager;
pub mod sma;

pub use manager::{StrategyHandle, StrategyManager};
pub use sma::SmaCrossover;

use crate::events::{FillReport, OrderUpdate, Quote, Trade};

/// A trading strategy driven by the event stream.
///
/// Strategies route orders through their portfolio, never directly to
/// the bus, so the risk gate always applies. `start` and `stop` are
/// idempotent; the manager only dispatches events to running
/// strategies, and implementations must tolerate hooks arriving out of
/// band before `start` or after `stop`.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Begin trading. Called once by the manager; repeated calls are a
    /// no-op.
    fn start(&mut self);

    /// Stop trading. Idempotent.
    fn stop(&mut self);

    fn on_trade(&mut self, _trade: &Trade) {}

    fn on_quote(&mut self, _quote: &Quote) {}

    fn on_order(&mut self, _update: &OrderUpdate) {}

    fn on_fill(&mut self, _fill: &FillReport) {}
}
