//! Strategy runtime: per-instrument state, market-data dispatch and the
//! user-strategy contract.
//!
//! User code implements [`Strategy`] and interacts with the engine through
//! the [`StrategyContext`] passed to each callback: submitting orders,
//! canceling/replacing them, and querying windows, position and P&L. The
//! [`StrategyRuntime`] owns the context, dispatches incoming events and
//! collects the requests the user issued during a callback.

mod context;
mod runtime;

pub use context::{RequestKind, StrategyContext};
pub use runtime::{RuntimeOutput, StrategyRuntime};

use crate::data::{Candle, Tick};
use rust_decimal::Decimal;

/// User-defined trading logic, driven by the strategy runtime.
///
/// Callbacks fire only once the relevant rolling window holds at least the
/// configured number of periods.
pub trait Strategy: Send {
    /// A validated tick entered the window.
    fn on_tick(&mut self, ctx: &mut StrategyContext, tick: &Tick);

    /// A new candle opened at `price`.
    fn on_candle_open(&mut self, ctx: &mut StrategyContext, price: Decimal) {
        let _ = (ctx, price);
    }

    /// A candle completed.
    fn on_candle_close(&mut self, ctx: &mut StrategyContext, candle: &Candle) {
        let _ = (ctx, candle);
    }
}
