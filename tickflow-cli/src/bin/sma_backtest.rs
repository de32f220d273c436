//! SMA crossover backtest entry point.
//!
//! Reads the config file (default `config.ini`), loads the historical
//! trade CSV it names, runs the SMA strategy over it, and prints the
//! performance report. Exits 1 with a one-line error on failure.
//!
//! Usage: `sma_backtest [config-file]`

use anyhow::Context;
use tracing::warn;

use tickflow_core::config::Config;
use tickflow_core::strategy::SmaCrossover;
use tickflow_runner::Backtester;

fn main() {
    if let Err(err) = run() {
        // One line to stderr: Display gives the top context only.
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.ini".to_string());
    let config = match Config::load_from_file(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "config not loaded; using defaults");
            Config::new()
        }
    };

    let initial_capital = config.get_f64("backtest.initial_capital", 1_000_000.0);
    let data_file = config.get_str("backtest.data_file", "data/historical_trades.csv");
    let symbol = config.get_str("backtest.symbol", "AAPL");

    println!("=== SMA Strategy Backtest ===");
    println!("Initial Capital: ${initial_capital:.2}");
    println!("Data File: {data_file}");
    println!(
        "SMA Periods: fast {} / slow {}, position size {}",
        config.get_i64("strategy.sma.fast_period", 10),
        config.get_i64("strategy.sma.slow_period", 30),
        config.get_i64("strategy.sma.position_size", 100),
    );
    println!();

    let mut backtester = Backtester::new(initial_capital);
    let strategy = SmaCrossover::from_config(
        format!("SMA_{symbol}"),
        backtester.portfolio(),
        symbol.clone(),
        &config,
    );
    backtester.add_strategy(strategy);

    backtester
        .load_csv(&data_file)
        .with_context(|| format!("loading historical data from {data_file}"))?;

    let report = backtester.run().context("running backtest")?;
    println!("{report}");
    println!();

    let output_dir = config.get_str("backtest.output_dir", "");
    if !output_dir.is_empty() {
        tickflow_runner::export::write_artifacts(&output_dir, &report, backtester.snapshots())
            .with_context(|| format!("writing artifacts to {output_dir}"))?;
        println!("Artifacts written to {output_dir}");
    }

    let portfolio = backtester.portfolio();
    println!("Final Portfolio State:");
    println!("  Cash: ${:.2}", portfolio.cash());
    println!("  Realized P&L: ${:.2}", portfolio.realized_pnl());

    let positions = portfolio.ledger().positions();
    if !positions.is_empty() {
        println!("  Open Positions:");
        for position in positions {
            println!(
                "    {}: {} @ ${:.2} (realized ${:.2})",
                position.symbol, position.qty, position.avg_price, position.realized_pnl
            );
        }
    }

    Ok(())
}
