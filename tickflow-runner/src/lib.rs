//! Tickflow backtest runner.
//!
//! Loads historical trade data, replays it through the core engine, and
//! reports performance metrics.

pub mod backtest;
pub mod data;
pub mod export;
pub mod metrics;

pub use backtest::{Backtester, BacktestError};
pub use data::TradeTick;
pub use metrics::{BacktestReport, PortfolioSnapshot};
