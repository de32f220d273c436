//! Top-of-book and depth tracking, for observability only.
//!
//! The matching path never consults these books; they exist so
//! operators can watch the market the engine is seeing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bus::{EventBus, SubscriptionId};
use crate::events::{EventKind, EventPayload, Quote};

/// One aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: i64,
}

/// Aggregated book for a single symbol.
///
/// Bids are held best-first (descending price), asks best-first
/// (ascending price).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn update_bid(&mut self, price: f64, qty: i64) {
        Self::set_level(&mut self.bids, price, qty, true);
    }

    pub fn update_ask(&mut self, price: f64, qty: i64) {
        Self::set_level(&mut self.asks, price, qty, false);
    }

    pub fn remove_bid(&mut self, price: f64) {
        self.bids.retain(|l| l.price != price);
    }

    pub fn remove_ask(&mut self, price: f64) {
        self.asks.retain(|l| l.price != price);
    }

    fn set_level(levels: &mut Vec<PriceLevel>, price: f64, qty: i64, descending: bool) {
        if qty <= 0 {
            levels.retain(|l| l.price != price);
            return;
        }
        if let Some(level) = levels.iter_mut().find(|l| l.price == price) {
            level.qty = qty;
            return;
        }
        levels.push(PriceLevel { price, qty });
        if descending {
            levels.sort_by(|a, b| b.price.total_cmp(&a.price));
        } else {
            levels.sort_by(|a, b| a.price.total_cmp(&b.price));
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Ask minus bid; 0.0 when either side is empty.
    pub fn spread(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price - bid.price,
            _ => 0.0,
        }
    }

    /// Midpoint of the BBO; 0.0 when either side is empty.
    pub fn mid_price(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid.price + ask.price) / 2.0,
            _ => 0.0,
        }
    }

    pub fn bid_depth(&self, levels: usize) -> Vec<PriceLevel> {
        self.bids.iter().take(levels).copied().collect()
    }

    pub fn ask_depth(&self, levels: usize) -> Vec<PriceLevel> {
        self.asks.iter().take(levels).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    fn apply_quote(&mut self, quote: &Quote) {
        self.update_bid(quote.bid_px, quote.bid_sz);
        self.update_ask(quote.ask_px, quote.ask_sz);
    }
}

/// Best bid and offer snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopOfBook {
    pub symbol: String,
    pub bid: Option<PriceLevel>,
    pub ask: Option<PriceLevel>,
    pub spread: f64,
    pub mid_price: f64,
}

/// Maintains books for every symbol seen in the quote stream.
pub struct BookManager {
    books: Arc<Mutex<HashMap<String, OrderBook>>>,
    bus: Arc<EventBus>,
    subscription: SubscriptionId,
}

impl BookManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let books: Arc<Mutex<HashMap<String, OrderBook>>> = Arc::new(Mutex::new(HashMap::new()));

        let handler_books = books.clone();
        let subscription = bus.subscribe(EventKind::MarketData, move |event| {
            if let EventPayload::Quote(quote) = &event.payload {
                handler_books
                    .lock()
                    .entry(quote.symbol.clone())
                    .or_insert_with(|| OrderBook::new(quote.symbol.clone()))
                    .apply_quote(quote);
            }
        });

        Self {
            books,
            bus,
            subscription,
        }
    }

    pub fn book(&self, symbol: &str) -> Option<OrderBook> {
        self.books.lock().get(symbol).cloned()
    }

    pub fn has_book(&self, symbol: &str) -> bool {
        self.books.lock().contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.books.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn book_count(&self) -> usize {
        self.books.lock().len()
    }

    pub fn top_of_book(&self, symbol: &str) -> Option<TopOfBook> {
        self.books.lock().get(symbol).map(|book| TopOfBook {
            symbol: book.symbol.clone(),
            bid: book.best_bid(),
            ask: book.best_ask(),
            spread: book.spread(),
            mid_price: book.mid_price(),
        })
    }

    pub fn top_of_books(&self) -> Vec<TopOfBook> {
        let books = self.books.lock();
        let mut tops: Vec<TopOfBook> = books
            .values()
            .map(|book| TopOfBook {
                symbol: book.symbol.clone(),
                bid: book.best_bid(),
                ask: book.best_ask(),
                spread: book.spread(),
                mid_price: book.mid_price(),
            })
            .collect();
        tops.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tops
    }

    pub fn remove_book(&self, symbol: &str) {
        self.books.lock().remove(symbol);
    }

    pub fn clear(&self) {
        self.books.lock().clear();
    }
}

impl Drop for BookManager {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}
