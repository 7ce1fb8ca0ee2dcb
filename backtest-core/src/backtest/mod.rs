//! Backtest engine: task wiring, chronological routing and run reports.
//!
//! One task per instrument for the broker worker and one for the strategy
//! runtime, a router task distributing the replayed stream, and a portfolio
//! aggregator task - all connected by bounded channels. Per instrument, the
//! broker hands each ordered event batch to the strategy task and waits for
//! its reply batch of new requests before consuming the next market-data
//! event, which serializes handlers and keeps runs deterministic.

mod engine;
mod report;

pub use engine::BacktestEngine;
pub use report::{BacktestReport, SymbolReport};
