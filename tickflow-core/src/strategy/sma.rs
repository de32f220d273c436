//! Simple moving average crossover — the reference strategy.
//!
//! Goes long on a golden cross (fast SMA strictly above slow SMA after
//! being at or below it) and short on a death cross. One position at a
//! time; each signal targets `±position_size` and sizes the order to
//! reach the target from the current position.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::config::Config;
use crate::domain::{OrderType, Side};
use crate::events::Trade;
use crate::portfolio::Portfolio;
use crate::strategy::Strategy;

pub const DEFAULT_FAST_PERIOD: usize = 10;
pub const DEFAULT_SLOW_PERIOD: usize = 30;
pub const DEFAULT_POSITION_SIZE: i64 = 100;

/// Relationship of the fast SMA to the slow SMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossState {
    /// Window not yet full; no signal possible.
    Uninitialized,
    FastAbove,
    FastBelow,
}

/// SMA crossover strategy for a single symbol.
pub struct SmaCrossover {
    name: String,
    symbol: String,
    fast_period: usize,
    slow_period: usize,
    position_size: i64,
    portfolio: Arc<Portfolio>,
    prices: VecDeque<f64>,
    prev_cross: CrossState,
    running: bool,
    order_seq: u64,
}

impl SmaCrossover {
    /// `fast_period` must be at least 1 and strictly less than
    /// `slow_period`.
    pub fn new(
        name: impl Into<String>,
        portfolio: Arc<Portfolio>,
        symbol: impl Into<String>,
        fast_period: usize,
        slow_period: usize,
        position_size: i64,
    ) -> Self {
        assert!(fast_period >= 1, "fast_period must be >= 1");
        assert!(
            slow_period > fast_period,
            "slow_period must be > fast_period"
        );
        Self {
            name: name.into(),
            symbol: symbol.into(),
            fast_period,
            slow_period,
            position_size,
            portfolio,
            prices: VecDeque::new(),
            prev_cross: CrossState::Uninitialized,
            running: false,
            order_seq: 0,
        }
    }

    /// Build from `strategy.sma.*` config keys.
    pub fn from_config(
        name: impl Into<String>,
        portfolio: Arc<Portfolio>,
        symbol: impl Into<String>,
        config: &Config,
    ) -> Self {
        Self::new(
            name,
            portfolio,
            symbol,
            config.get_i64("strategy.sma.fast_period", DEFAULT_FAST_PERIOD as i64) as usize,
            config.get_i64("strategy.sma.slow_period", DEFAULT_SLOW_PERIOD as i64) as usize,
            config.get_i64("strategy.sma.position_size", DEFAULT_POSITION_SIZE),
        )
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn price_count(&self) -> usize {
        self.prices.len()
    }

    /// Mean of the most recent `period` prices; 0.0 while underfilled.
    fn sma(&self, period: usize) -> f64 {
        if self.prices.len() < period {
            return 0.0;
        }
        self.prices.iter().rev().take(period).sum::<f64>() / period as f64
    }

    pub fn fast_sma(&self) -> f64 {
        self.sma(self.fast_period)
    }

    pub fn slow_sma(&self) -> f64 {
        self.sma(self.slow_period)
    }

    fn next_order_id(&mut self) -> String {
        self.order_seq += 1;
        format!("{}_{}", self.name, self.order_seq)
    }

    fn current_position_qty(&self) -> i64 {
        self.portfolio
            .ledger()
            .position(&self.symbol)
            .map(|p| p.qty)
            .unwrap_or(0)
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.prices.clear();
            self.prev_cross = CrossState::Uninitialized;
        }
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn on_trade(&mut self, trade: &Trade) {
        if trade.symbol != self.symbol {
            return;
        }

        self.prices.push_back(trade.price);
        if self.prices.len() > self.slow_period {
            self.prices.pop_front();
        }
        if self.prices.len() < self.slow_period {
            return;
        }

        let fast = self.fast_sma();
        let slow = self.slow_sma();

        // Strict inequality; equal SMAs keep the previous state.
        let current = if fast > slow {
            CrossState::FastAbove
        } else if fast < slow {
            CrossState::FastBelow
        } else {
            self.prev_cross
        };

        let initialized = self.prev_cross != CrossState::Uninitialized;
        if initialized && current != self.prev_cross {
            let current_qty = self.current_position_qty();
            let marks: HashMap<String, f64> =
                HashMap::from([(self.symbol.clone(), trade.price)]);

            if current == CrossState::FastAbove && current_qty <= 0 {
                let order_qty = self.position_size - current_qty;
                let order_id = self.next_order_id();
                // A rejected submission is a no-op; retry on a later tick.
                let _ = self.portfolio.submit_order(
                    &order_id,
                    &self.symbol,
                    Side::Buy,
                    OrderType::Market,
                    trade.price,
                    order_qty,
                    &marks,
                );
            } else if current == CrossState::FastBelow && current_qty >= 0 {
                let order_qty = (-self.position_size - current_qty).abs();
                let order_id = self.next_order_id();
                let _ = self.portfolio.submit_order(
                    &order_id,
                    &self.symbol,
                    Side::Sell,
                    OrderType::Market,
                    trade.price,
                    order_qty,
                    &marks,
                );
            }
        }

        self.prev_cross = current;
    }
}
