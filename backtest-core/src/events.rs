//! Unified event model for the backtest pipeline.
//!
//! Everything that moves between the replayer, the simulated broker and the
//! strategy runtime is an [`Event`]: one instrument, one simulated timestamp,
//! one tagged payload. Dispatch is a `match` on the payload variant.
//!
//! Ordering discipline: the sequence of events delivered to a strategy
//! runtime is non-decreasing in `ts`. The broker holds generated events in a
//! pending buffer and releases them against incoming market-data timestamps
//! (see `execution::pending`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::{Candle, Tick, Timeframe};
use crate::orders::{Order, OrderId};

/// Tagged event payload.
///
/// Market-data variants originate from the replayer; request variants from
/// the strategy runtime; the remaining variants are broker responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // === Market data ===
    TickArrived(Tick),
    CandleOpen {
        price: Decimal,
        timeframe: Timeframe,
    },
    CandleClose(Candle),
    TickHistory(Vec<Tick>),
    CandleHistory(Vec<Candle>),
    EndOfData,

    // === Order requests (strategy -> broker) ===
    NewOrderRequest(Order),
    CancelRequest {
        order_id: OrderId,
    },
    ReplaceRequest {
        order_id: OrderId,
        new_price: Decimal,
    },

    // === Broker responses ===
    OrderConfirmed {
        order_id: OrderId,
    },
    OrderRejected {
        order_id: OrderId,
        reason: String,
    },
    OrderFilled {
        order_id: OrderId,
        price: Decimal,
        qty: u64,
    },
    OrderCanceled {
        order_id: OrderId,
    },
    OrderReplaced {
        order_id: OrderId,
        new_price: Decimal,
    },
    CancelRejected {
        order_id: OrderId,
        reason: String,
    },
    ReplaceRejected {
        order_id: OrderId,
        reason: String,
    },
    RequestNotDelivered {
        order_id: OrderId,
        reason: String,
    },
}

impl EventPayload {
    /// Whether this payload originated from the market-data replayer.
    pub fn is_market_data(&self) -> bool {
        matches!(
            self,
            EventPayload::TickArrived(_)
                | EventPayload::CandleOpen { .. }
                | EventPayload::CandleClose(_)
                | EventPayload::TickHistory(_)
                | EventPayload::CandleHistory(_)
                | EventPayload::EndOfData
        )
    }

    /// Whether this payload is a strategy request.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            EventPayload::NewOrderRequest(_)
                | EventPayload::CancelRequest { .. }
                | EventPayload::ReplaceRequest { .. }
        )
    }

    /// Whether this payload is a broker response.
    pub fn is_response(&self) -> bool {
        !self.is_market_data() && !self.is_request()
    }

    /// The order id this payload refers to, if any.
    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            EventPayload::NewOrderRequest(order) => Some(&order.id),
            EventPayload::CancelRequest { order_id }
            | EventPayload::ReplaceRequest { order_id, .. }
            | EventPayload::OrderConfirmed { order_id }
            | EventPayload::OrderRejected { order_id, .. }
            | EventPayload::OrderFilled { order_id, .. }
            | EventPayload::OrderCanceled { order_id }
            | EventPayload::OrderReplaced { order_id, .. }
            | EventPayload::CancelRejected { order_id, .. }
            | EventPayload::ReplaceRejected { order_id, .. }
            | EventPayload::RequestNotDelivered { order_id, .. } => Some(order_id),
            _ => None,
        }
    }

    /// Short tag for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::TickArrived(_) => "TickArrived",
            EventPayload::CandleOpen { .. } => "CandleOpen",
            EventPayload::CandleClose(_) => "CandleClose",
            EventPayload::TickHistory(_) => "TickHistory",
            EventPayload::CandleHistory(_) => "CandleHistory",
            EventPayload::EndOfData => "EndOfData",
            EventPayload::NewOrderRequest(_) => "NewOrderRequest",
            EventPayload::CancelRequest { .. } => "CancelRequest",
            EventPayload::ReplaceRequest { .. } => "ReplaceRequest",
            EventPayload::OrderConfirmed { .. } => "OrderConfirmed",
            EventPayload::OrderRejected { .. } => "OrderRejected",
            EventPayload::OrderFilled { .. } => "OrderFilled",
            EventPayload::OrderCanceled { .. } => "OrderCanceled",
            EventPayload::OrderReplaced { .. } => "OrderReplaced",
            EventPayload::CancelRejected { .. } => "CancelRejected",
            EventPayload::ReplaceRejected { .. } => "ReplaceRejected",
            EventPayload::RequestNotDelivered { .. } => "RequestNotDelivered",
        }
    }
}

/// An event in the pipeline: one instrument, one simulated timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(symbol: impl Into<String>, ts: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            symbol: symbol.into(),
            ts,
            payload,
        }
    }

    /// Wrap a tick; the event timestamp is the tick's own datetime.
    pub fn tick(tick: Tick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            ts: tick.datetime,
            payload: EventPayload::TickArrived(tick),
        }
    }

    /// Wrap a candle close; the event timestamp is the candle's datetime.
    pub fn candle_close(candle: Candle) -> Self {
        Self {
            symbol: candle.symbol.clone(),
            ts: candle.datetime,
            payload: EventPayload::CandleClose(candle),
        }
    }

    /// A candle-open price point.
    pub fn candle_open(
        symbol: impl Into<String>,
        ts: DateTime<Utc>,
        price: Decimal,
        timeframe: Timeframe,
    ) -> Self {
        Self::new(symbol, ts, EventPayload::CandleOpen { price, timeframe })
    }

    /// End-of-data marker for one instrument.
    pub fn end_of_data(symbol: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self::new(symbol, ts, EventPayload::EndOfData)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload.order_id() {
            Some(id) => write!(f, "{}[{} {} {}]", self.payload.name(), self.symbol, self.ts, id),
            None => write!(f, "{}[{} {}]", self.payload.name(), self.symbol, self.ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderSide, TimeInForce};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_tick_event_takes_tick_timestamp() {
        let tick = Tick::trade("AAPL", ts(), dec!(100), 10);
        let event = Event::tick(tick);
        assert_eq!(event.ts, ts());
        assert_eq!(event.symbol, "AAPL");
        assert!(event.payload.is_market_data());
        assert!(!event.payload.is_response());
    }

    #[test]
    fn test_payload_classification() {
        let order = Order::limit("AAPL", OrderSide::Buy, 10, dec!(100), TimeInForce::GTC, ts())
            .build()
            .unwrap();
        let request = EventPayload::NewOrderRequest(order);
        assert!(request.is_request());
        assert!(!request.is_market_data());

        let response = EventPayload::OrderConfirmed {
            order_id: OrderId::new("AAPL-BUY-1"),
        };
        assert!(response.is_response());
        assert!(!response.is_request());

        assert!(EventPayload::EndOfData.is_market_data());
    }

    #[test]
    fn test_order_id_extraction() {
        let payload = EventPayload::OrderFilled {
            order_id: OrderId::new("AAPL-BUY-1"),
            price: dec!(100),
            qty: 10,
        };
        assert_eq!(payload.order_id().unwrap().as_str(), "AAPL-BUY-1");

        let tick = Tick::trade("AAPL", ts(), dec!(100), 10);
        assert!(EventPayload::TickArrived(tick).order_id().is_none());
    }

    #[test]
    fn test_display() {
        let event = Event::new(
            "AAPL",
            ts(),
            EventPayload::OrderCanceled {
                order_id: OrderId::new("AAPL-BUY-1"),
            },
        );
        let rendered = event.to_string();
        assert!(rendered.contains("OrderCanceled"));
        assert!(rendered.contains("AAPL-BUY-1"));
    }
}
