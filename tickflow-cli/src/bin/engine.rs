//! Engine demo shell: wires the full event pipeline and drives a short
//! synthetic session through it, reporting dispatch latency at the end.
//!
//! Usage: `engine [config-file]`

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::info;

use tickflow_core::book::BookManager;
use tickflow_core::bus::EventBus;
use tickflow_core::config::Config;
use tickflow_core::domain::{OrderType, Side};
use tickflow_core::events::{Event, EventKind, SystemEventKind};
use tickflow_core::latency::LatencyStats;
use tickflow_core::portfolio::Portfolio;
use tickflow_core::venue::{SimulatedVenue, VenueConfig};

fn main() {
    if let Err(err) = run() {
        // One line to stderr: Display gives the top context only.
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("loading config {path}"))?,
        None => Config::new(),
    };

    let bus = Arc::new(EventBus::new());
    let portfolio = Arc::new(Portfolio::from_config(bus.clone(), &config));
    let books = BookManager::new(bus.clone());
    let venue = SimulatedVenue::new(
        bus.clone(),
        VenueConfig {
            instant_fills: true,
            ..VenueConfig::from_config(&config)
        },
    );
    venue.start();

    // Measure event age at the end of the dispatch chain.
    let latency = Arc::new(Mutex::new(LatencyStats::with_capacity(64)));
    for kind in [EventKind::MarketData, EventKind::Order, EventKind::Fill] {
        let latency = latency.clone();
        bus.subscribe(kind, move |event| {
            latency.lock().record(event.age().as_micros() as u64);
        });
    }

    bus.publish(&Event::system(SystemEventKind::Startup, "engine demo starting"));
    bus.publish(&Event::system(SystemEventKind::TradingStart, "session open"));

    info!("publishing market data");
    bus.publish(&Event::quote("AAPL", 150.00, 150.10, 300, 200));
    bus.publish(&Event::quote("MSFT", 300.00, 300.20, 100, 150));
    bus.publish(&Event::trade("AAPL", 150.05, 500));
    venue.set_mark("AAPL", 150.05);

    info!("submitting order flow");
    let marks: HashMap<String, f64> = HashMap::from([("AAPL".to_string(), 150.05)]);
    let admitted = portfolio.submit_order(
        "DEMO_1",
        "AAPL",
        Side::Buy,
        OrderType::Market,
        150.05,
        100,
        &marks,
    );
    info!(admitted, "order DEMO_1 submitted");

    // Deferred side-channel events drain after the hot path.
    bus.enqueue(Event::timer("heartbeat"));
    bus.enqueue(Event::system(SystemEventKind::HealthCheck, "all green"));
    let drained = bus.drain(0);

    bus.publish(&Event::system(SystemEventKind::TradingStop, "session close"));
    venue.stop();

    println!("--- Engine Demo Summary ---");
    if let Some(top) = books.top_of_book("AAPL") {
        println!(
            "AAPL top of book: bid {:?} / ask {:?} (spread {:.2})",
            top.bid, top.ask, top.spread
        );
    }
    if let Some(position) = portfolio.ledger().position("AAPL") {
        println!(
            "AAPL position: {} @ {:.2} (realized {:.2})",
            position.qty, position.avg_price, position.realized_pnl
        );
    }
    println!("cash: {:.2}", portfolio.cash());
    println!("events dispatched: {}, queue drained: {}", bus.event_count(), drained);

    if let Some(summary) = latency.lock().summary() {
        println!(
            "dispatch latency (us): n={} mean={:.1} p50={} p95={} p99={} max={}",
            summary.count, summary.mean, summary.median, summary.p95, summary.p99, summary.max
        );
    }

    Ok(())
}
