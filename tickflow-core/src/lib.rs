//! Tickflow core engine.
//!
//! Provides the typed event bus, order/position domain, order ledger,
//! portfolio risk gate, strategy runtime, and the simulated venue.

pub mod book;
pub mod bus;
pub mod config;
pub mod domain;
pub mod events;
pub mod latency;
pub mod ledger;
pub mod portfolio;
pub mod strategy;
pub mod venue;
