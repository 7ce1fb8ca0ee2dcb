//! Position accounting: trades as position arcs.
//!
//! A [`Trade`] tracks one arc of a position for a single instrument, from
//! Flat through Long/Short back to Closed. Fills route through the current
//! trade; when the position crosses zero a successor trade is created and
//! any still-working orders migrate to it.

mod trade;

pub use trade::{Fill, Trade, TradeError, TradeKind};
