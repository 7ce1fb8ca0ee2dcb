//! Core market-data types.
//!
//! A [`Tick`] is a point-in-time sample carrying a trade leg and/or a quote
//! leg plus session markers. A [`Candle`] is an OHLCV aggregation over a
//! [`Timeframe`]. Both validate themselves before entering the pipeline;
//! broken data is surfaced as a [`DataError`] and dropped.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DataError;

/// Candle aggregation timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timeframe {
    Minute,
    Hour,
    Day,
    Week,
}

impl Timeframe {
    /// Wall-clock span covered by one candle of this timeframe.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Minute => Duration::minutes(1),
            Timeframe::Hour => Duration::hours(1),
            Timeframe::Day => Duration::days(1),
            Timeframe::Week => Duration::weeks(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Minute => write!(f, "MINUTE"),
            Timeframe::Hour => write!(f, "HOUR"),
            Timeframe::Day => write!(f, "DAY"),
            Timeframe::Week => write!(f, "WEEK"),
        }
    }
}

/// Trade leg of a tick: last traded price and size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickTrade {
    pub last_price: Decimal,
    pub last_size: u64,
}

/// Quote leg of a tick: best bid/ask with sizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickQuote {
    pub bid_price: Decimal,
    pub bid_size: u64,
    pub ask_price: Decimal,
    pub ask_size: u64,
}

/// A point-in-time market-data sample.
///
/// Must carry a trade leg, a quote leg, or both. Session markers flag the
/// opening and closing auction prints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub datetime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<TickTrade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<TickQuote>,
    #[serde(default)]
    pub is_opening: bool,
    #[serde(default)]
    pub is_closing: bool,
}

impl Tick {
    /// Create a trade-only tick.
    pub fn trade(
        symbol: impl Into<String>,
        datetime: DateTime<Utc>,
        last_price: Decimal,
        last_size: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            datetime,
            trade: Some(TickTrade {
                last_price,
                last_size,
            }),
            quote: None,
            is_opening: false,
            is_closing: false,
        }
    }

    /// Create a quote-only tick.
    pub fn quote(
        symbol: impl Into<String>,
        datetime: DateTime<Utc>,
        bid_price: Decimal,
        bid_size: u64,
        ask_price: Decimal,
        ask_size: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            datetime,
            trade: None,
            quote: Some(TickQuote {
                bid_price,
                bid_size,
                ask_price,
                ask_size,
            }),
            is_opening: false,
            is_closing: false,
        }
    }

    /// Attach a quote leg.
    pub fn with_quote(
        mut self,
        bid_price: Decimal,
        bid_size: u64,
        ask_price: Decimal,
        ask_size: u64,
    ) -> Self {
        self.quote = Some(TickQuote {
            bid_price,
            bid_size,
            ask_price,
            ask_size,
        });
        self
    }

    /// Mark as the opening auction print.
    pub fn opening(mut self) -> Self {
        self.is_opening = true;
        self
    }

    /// Mark as the closing auction print.
    pub fn closing(mut self) -> Self {
        self.is_closing = true;
        self
    }

    /// Last traded price, if the tick has a trade leg.
    pub fn last_price(&self) -> Option<Decimal> {
        self.trade.map(|t| t.last_price)
    }

    pub fn has_trade(&self) -> bool {
        self.trade.is_some()
    }

    pub fn has_quote(&self) -> bool {
        self.quote.is_some()
    }

    /// Validate the tick. Broken ticks are dropped upstream.
    pub fn validate(&self) -> Result<(), DataError> {
        let broken = |reason: &str| DataError::BrokenTick {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
        };

        if self.trade.is_none() && self.quote.is_none() {
            return Err(broken("neither trade nor quote present"));
        }
        if let Some(trade) = &self.trade {
            if trade.last_price <= Decimal::ZERO {
                return Err(broken("last price must be positive"));
            }
            if trade.last_size == 0 {
                return Err(broken("last size must be positive"));
            }
        }
        if let Some(quote) = &self.quote {
            if quote.bid_price <= Decimal::ZERO || quote.ask_price <= Decimal::ZERO {
                return Err(broken("quote prices must be positive"));
            }
            if quote.bid_size == 0 || quote.ask_size == 0 {
                return Err(broken("quote sizes must be positive"));
            }
        }
        Ok(())
    }
}

/// An OHLCV aggregation over one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub datetime: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl Candle {
    pub fn new(
        symbol: impl Into<String>,
        datetime: DateTime<Utc>,
        timeframe: Timeframe,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            datetime,
            timeframe,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate the OHLC invariant: low <= open <= high, low <= close <= high.
    pub fn validate(&self) -> Result<(), DataError> {
        let invalid = |reason: &str| DataError::InvalidCandle {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
        };

        if self.low <= Decimal::ZERO {
            return Err(invalid("prices must be positive"));
        }
        if self.low > self.high {
            return Err(invalid("low above high"));
        }
        if self.open < self.low || self.open > self.high {
            return Err(invalid("open outside low..high"));
        }
        if self.close < self.low || self.close > self.high {
            return Err(invalid("close outside low..high"));
        }
        Ok(())
    }
}

/// Inclusive calendar date range for historical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}
