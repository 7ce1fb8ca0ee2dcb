//! Market data model and external data interfaces.
//!
//! - [`types`] — ticks, candles, timeframes and their validity rules
//! - [`feed`] — the market-data producer and historical-storage contracts

pub mod feed;
pub mod types;

pub use feed::{prepared_data_id, HistoricalStorage, MarketDataProducer, ReplayFeed};
pub use types::{Candle, DateRange, Tick, TickQuote, TickTrade, Timeframe};
