//! Backtest performance metrics — pure functions over snapshots.
//!
//! Every metric takes the snapshot series (or values derived from it)
//! and returns a scalar; nothing here touches the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Annual risk-free rate used for Sharpe unless overridden.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

/// Trading days per year for annualization.
const TRADING_DAYS: f64 = 252.0;

/// Realized-P&L changes below this threshold are not counted as trades.
const TRADE_PNL_TOLERANCE: f64 = 1e-2;

/// Portfolio state captured at one replay step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp_ms: i64,
    pub portfolio_value: f64,
    pub cash: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

/// Aggregate results of one backtest run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestReport {
    pub total_return: f64,
    pub total_return_dollars: f64,
    pub sharpe_ratio: f64,
    /// Positive fraction: (peak - trough) / peak at the worst point.
    pub max_drawdown: f64,
    pub max_drawdown_dollars: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub average_win: f64,
    /// Positive magnitude of the mean losing trade.
    pub average_loss: f64,
    pub profit_factor: f64,
    pub largest_win: f64,
    /// Signed (negative) worst single trade.
    pub largest_loss: f64,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub duration_days: f64,
}

impl BacktestReport {
    /// Compute all metrics from the snapshot series.
    pub fn from_snapshots(
        snapshots: &[PortfolioSnapshot],
        initial_capital: f64,
        risk_free_rate: f64,
    ) -> Self {
        let mut report = Self::default();
        if snapshots.is_empty() {
            return report;
        }

        let values: Vec<f64> = snapshots.iter().map(|s| s.portfolio_value).collect();
        let final_value = values[values.len() - 1];

        report.total_return = total_return(initial_capital, final_value);
        report.total_return_dollars = final_value - initial_capital;

        report.start_time_ms = snapshots[0].timestamp_ms;
        report.end_time_ms = snapshots[snapshots.len() - 1].timestamp_ms;
        report.duration_days =
            (report.end_time_ms - report.start_time_ms) as f64 / (1000.0 * 86_400.0);

        let returns = step_returns(&values);
        report.sharpe_ratio = sharpe_ratio(&returns, risk_free_rate);
        report.max_drawdown = max_drawdown(&values);
        report.max_drawdown_dollars = max_drawdown_dollars(&values);

        // Trade statistics: every realized-P&L change is one closed trade.
        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;
        let mut previous_realized = 0.0;
        for snapshot in snapshots {
            let change = snapshot.realized_pnl - previous_realized;
            if change.abs() > TRADE_PNL_TOLERANCE {
                report.total_trades += 1;
                if change > 0.0 {
                    report.winning_trades += 1;
                    gross_win += change;
                    if change > report.largest_win {
                        report.largest_win = change;
                    }
                } else {
                    report.losing_trades += 1;
                    gross_loss += change.abs();
                    if change < report.largest_loss {
                        report.largest_loss = change;
                    }
                }
            }
            previous_realized = snapshot.realized_pnl;
        }

        if report.total_trades > 0 {
            report.win_rate = report.winning_trades as f64 / report.total_trades as f64;
        }
        if report.winning_trades > 0 {
            report.average_win = gross_win / report.winning_trades as f64;
        }
        if report.losing_trades > 0 {
            report.average_loss = gross_loss / report.losing_trades as f64;
        }
        if gross_loss > 0.0 {
            report.profit_factor = gross_win / gross_loss;
        }

        report
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Results ===")?;
        writeln!(f, "Total Return: {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "Total Return ($): ${:.2}", self.total_return_dollars)?;
        writeln!(f, "Sharpe Ratio: {:.3}", self.sharpe_ratio)?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "Max Drawdown ($): ${:.2}", self.max_drawdown_dollars)?;
        writeln!(f)?;
        writeln!(f, "Trade Statistics:")?;
        writeln!(f, "Total Trades: {}", self.total_trades)?;
        writeln!(f, "Winning Trades: {}", self.winning_trades)?;
        writeln!(f, "Losing Trades: {}", self.losing_trades)?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "Average Win: ${:.2}", self.average_win)?;
        writeln!(f, "Average Loss: ${:.2}", self.average_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Largest Win: ${:.2}", self.largest_win)?;
        writeln!(f, "Largest Loss: ${:.2}", self.largest_loss)?;
        writeln!(f)?;
        write!(f, "Duration: {:.2} days", self.duration_days)
    }
}

/// Fractional return from initial to final value; 0.0 for zero initial.
pub fn total_return(initial_value: f64, final_value: f64) -> f64 {
    if initial_value == 0.0 {
        return 0.0;
    }
    (final_value - initial_value) / initial_value
}

/// Step-over-step returns; steps starting from a zero value are skipped.
pub fn step_returns(values: &[f64]) -> Vec<f64> {
    if values.len() < 2 {
        return Vec::new();
    }
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Annualized Sharpe ratio over per-step returns.
///
/// The annual risk-free rate is compounded down to a daily rate, excess
/// returns use the sample standard deviation (Bessel's correction), and
/// the result is scaled by sqrt(252). Returns 0.0 with fewer than two
/// returns or zero deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = (1.0 + risk_free_rate).powf(1.0 / TRADING_DAYS) - 1.0;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();

    let m = mean(&excess);
    let sd = std_dev(&excess, m);
    if sd == 0.0 {
        return 0.0;
    }
    (m / sd) * TRADING_DAYS.sqrt()
}

/// Maximum drawdown as a positive fraction of the running peak.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = match values.first() {
        Some(&v) => v,
        None => return 0.0,
    };
    let mut worst = 0.0_f64;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

/// Maximum peak-to-trough decline in dollars.
pub fn max_drawdown_dollars(values: &[f64]) -> f64 {
    let mut peak = match values.first() {
        Some(&v) => v,
        None => return 0.0,
    };
    let mut worst = 0.0_f64;
    for &value in values {
        if value > peak {
            peak = value;
        }
        let drawdown = peak - value;
        if drawdown > worst {
            worst = drawdown;
        }
    }
    worst
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}
