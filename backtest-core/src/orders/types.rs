//! Core order enums and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order identifier, globally unique within a run.
///
/// Generated deterministically by the strategy runtime
/// (`{symbol}-{side}-{seq}`) so backtests are reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Order side indicating buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Position delta sign: +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type determining execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute immediately at best available price
    Market,
    /// Execute at the limit price or better
    Limit,
    /// Becomes a market order once the stop price is crossed
    Stop,
    /// Limit order eligible only at the opening auction
    LimitOnOpen,
    /// Limit order eligible only at the closing auction
    LimitOnClose,
    /// Market order eligible only at the opening auction
    MarketOnOpen,
    /// Market order eligible only at the closing auction
    MarketOnClose,
}

impl OrderType {
    /// Whether this type carries a price (limit or stop level).
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            OrderType::Limit | OrderType::Stop | OrderType::LimitOnOpen | OrderType::LimitOnClose
        )
    }

    /// Whether this type is only eligible at an auction.
    pub fn is_auction(&self) -> bool {
        self.fires_on_open() || self.fires_on_close()
    }

    /// Eligible only at the opening auction.
    pub fn fires_on_open(&self) -> bool {
        matches!(self, OrderType::LimitOnOpen | OrderType::MarketOnOpen)
    }

    /// Eligible only at the closing auction.
    pub fn fires_on_close(&self) -> bool {
        matches!(self, OrderType::LimitOnClose | OrderType::MarketOnClose)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::LimitOnOpen => write!(f, "LIMIT_ON_OPEN"),
            OrderType::LimitOnClose => write!(f, "LIMIT_ON_CLOSE"),
            OrderType::MarketOnOpen => write!(f, "MARKET_ON_OPEN"),
            OrderType::MarketOnClose => write!(f, "MARKET_ON_CLOSE"),
        }
    }
}

/// Order status within the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, not yet acknowledged by the broker
    New,
    /// Acknowledged and working
    Confirmed,
    /// Partially executed, remainder working
    PartialFilled,
    /// Fully executed (terminal)
    Filled,
    /// Canceled or expired (terminal)
    Canceled,
    /// Rejected at submission (terminal)
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    /// Working on the broker side and eligible for matching.
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::PartialFilled)
    }

    /// Check if transition from current status to target is valid.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        match self {
            OrderStatus::New => matches!(target, OrderStatus::Confirmed | OrderStatus::Rejected),
            OrderStatus::Confirmed => matches!(
                target,
                OrderStatus::PartialFilled | OrderStatus::Filled | OrderStatus::Canceled
            ),
            OrderStatus::PartialFilled => matches!(
                target,
                OrderStatus::PartialFilled | OrderStatus::Filled | OrderStatus::Canceled
            ),
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::Confirmed => write!(f, "CONFIRMED"),
            OrderStatus::PartialFilled => write!(f, "PARTIAL_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Canceled => write!(f, "CANCELED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Time-in-force controlling order expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Good-till-canceled (expires ten years out, effectively never)
    #[default]
    GTC,
    /// Expires at exchange midnight after the submission day
    Day,
    /// Valid only inside the instrument's auction window
    Auction,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::GTC => write!(f, "GTC"),
            TimeInForce::Day => write!(f, "DAY"),
            TimeInForce::Auction => write!(f, "AUCTION"),
        }
    }
}
