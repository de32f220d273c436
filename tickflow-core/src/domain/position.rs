//! Position — signed net holding in a single symbol.

use serde::{Deserialize, Serialize};

use super::order::Side;

/// Net position for one symbol.
///
/// `qty` is signed: positive long, negative short, zero flat. `avg_price`
/// is the entry cost basis for the current direction; when the position
/// goes flat it is left at the last fill price and reset by the next
/// opening fill. `realized_pnl` accumulates over all closed quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: i64,
    pub avg_price: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            qty: 0,
            avg_price: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty == 0
    }

    pub fn is_long(&self) -> bool {
        self.qty > 0
    }

    pub fn is_short(&self) -> bool {
        self.qty < 0
    }

    /// Apply a fill, opening, extending, reducing, or flipping the position.
    ///
    /// Closing quantity realizes P&L against the entry basis; a fill that
    /// flips direction re-bases `avg_price` at the fill price for the
    /// residual quantity.
    pub fn apply_fill(&mut self, side: Side, fill_qty: i64, fill_price: f64) {
        let signed = side.sign() * fill_qty;

        if self.qty == 0 {
            self.avg_price = fill_price;
            self.qty = signed;
            return;
        }

        let same_direction = (self.qty > 0) == (signed > 0);
        if same_direction {
            let total = self.qty + signed;
            self.avg_price = (self.avg_price * self.qty as f64 + fill_price * signed as f64)
                / total as f64;
            self.qty = total;
        } else {
            let closing_qty = signed.abs().min(self.qty.abs());
            let per_unit = if self.qty > 0 {
                fill_price - self.avg_price
            } else {
                self.avg_price - fill_price
            };
            self.realized_pnl += per_unit * closing_qty as f64;
            self.qty += signed;
            let flipped = (self.qty > 0 && signed > 0) || (self.qty < 0 && signed < 0);
            if flipped {
                self.avg_price = fill_price;
            }
        }
    }

    /// Unrealized P&L at the given mark; zero when flat.
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        if self.qty == 0 {
            return 0.0;
        }
        self.qty as f64 * (mark - self.avg_price)
    }

    /// Realized plus unrealized P&L at the given mark.
    pub fn total_pnl(&self, mark: f64) -> f64 {
        self.realized_pnl + self.unrealized_pnl(mark)
    }

    /// Signed market value at the given mark.
    pub fn market_value(&self, mark: f64) -> f64 {
        self.qty as f64 * mark
    }
}
