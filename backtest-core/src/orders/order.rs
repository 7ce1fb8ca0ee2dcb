//! Order struct and builder.
//!
//! Construction goes through [`OrderBuilder`], which enforces the invariants
//! the broker relies on: positive quantity, a valid price exactly when the
//! type calls for one, and TIF/type compatibility. State changes go through
//! validated transitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{OrderId, OrderSide, OrderStatus, OrderType, TimeInForce};

/// A trading order with lifecycle tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Globally unique identifier
    pub id: OrderId,
    /// Instrument symbol
    pub symbol: String,
    /// Buy or Sell
    pub side: OrderSide,
    /// Order type
    pub order_type: OrderType,
    /// Total quantity in lot units
    pub qty: u64,
    /// Working price; None for market-family types. Updated by replace.
    pub price: Option<Decimal>,
    /// Time in force
    pub tif: TimeInForce,
    /// Simulated submission time
    pub submitted: DateTime<Utc>,
    /// Lifecycle state
    pub status: OrderStatus,
    /// Cumulative executed quantity
    pub exec_qty: u64,
    /// Volume-weighted average fill price
    pub avg_fill_price: Option<Decimal>,
}

impl Order {
    /// Builder for a market order.
    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: u64,
        tif: TimeInForce,
        submitted: DateTime<Utc>,
    ) -> OrderBuilder {
        OrderBuilder::new(OrderType::Market, symbol, side, qty, tif, submitted)
    }

    /// Builder for a limit order.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: u64,
        price: Decimal,
        tif: TimeInForce,
        submitted: DateTime<Utc>,
    ) -> OrderBuilder {
        OrderBuilder::new(OrderType::Limit, symbol, side, qty, tif, submitted).with_price(price)
    }

    /// Builder for a stop order.
    pub fn stop(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: u64,
        stop_price: Decimal,
        tif: TimeInForce,
        submitted: DateTime<Utc>,
    ) -> OrderBuilder {
        OrderBuilder::new(OrderType::Stop, symbol, side, qty, tif, submitted)
            .with_price(stop_price)
    }

    /// Builder for an auction order (on-open / on-close types).
    pub fn auction(
        order_type: OrderType,
        symbol: impl Into<String>,
        side: OrderSide,
        qty: u64,
        submitted: DateTime<Utc>,
    ) -> OrderBuilder {
        OrderBuilder::new(
            order_type,
            symbol,
            side,
            qty,
            TimeInForce::Auction,
            submitted,
        )
    }

    // === State queries ===

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Re-check the structural invariants the builder enforces.
    ///
    /// The broker runs this at intake: orders arriving over the wire are not
    /// trusted to have come through [`OrderBuilder`].
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.qty == 0 {
            return Err(OrderError::InvalidQuantity {
                qty: self.qty,
                reason: "quantity must be positive".to_string(),
            });
        }
        if self.order_type.requires_price() {
            match self.price {
                None => {
                    return Err(OrderError::MissingPrice {
                        order_type: self.order_type,
                    })
                }
                Some(price) if price <= Decimal::ZERO => {
                    return Err(OrderError::InvalidPrice {
                        price,
                        reason: "price must be positive".to_string(),
                    });
                }
                Some(_) => {}
            }
        } else if self.price.is_some() {
            return Err(OrderError::UnexpectedPrice {
                order_type: self.order_type,
            });
        }
        if (self.tif == TimeInForce::Auction) != self.order_type.is_auction() {
            return Err(OrderError::InvalidTimeInForce {
                tif: self.tif,
                order_type: self.order_type,
            });
        }
        Ok(())
    }

    /// Working on the broker side and eligible for matching.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Remaining quantity to execute.
    pub fn leaves_qty(&self) -> u64 {
        self.qty.saturating_sub(self.exec_qty)
    }

    // === State transitions ===

    /// Apply a status change, validated against the state machine.
    pub fn transition_to(&mut self, target: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: target,
                order_id: self.id.clone(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Record an execution against this order.
    ///
    /// Moves to `PartialFilled` or `Filled` depending on the remaining
    /// quantity and maintains the volume-weighted average fill price.
    pub fn apply_fill(&mut self, fill_qty: u64, fill_price: Decimal) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::OrderClosed {
                order_id: self.id.clone(),
            });
        }
        if fill_qty == 0 {
            return Err(OrderError::InvalidQuantity {
                qty: fill_qty,
                reason: "fill quantity must be positive".to_string(),
            });
        }
        if fill_qty > self.leaves_qty() {
            return Err(OrderError::OverFill {
                order_id: self.id.clone(),
                fill_qty,
                leaves_qty: self.leaves_qty(),
            });
        }

        let filled = Decimal::from(self.exec_qty);
        let incoming = Decimal::from(fill_qty);
        self.avg_fill_price = Some(match self.avg_fill_price {
            Some(avg) => (avg * filled + fill_price * incoming) / (filled + incoming),
            None => fill_price,
        });

        self.exec_qty += fill_qty;
        let target = if self.leaves_qty() == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFilled
        };
        self.transition_to(target)
    }

    /// Cancel the order if it is still working.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Canceled)
    }

    /// Replace the working price. Only meaningful while active.
    pub fn replace_price(&mut self, new_price: Decimal) -> Result<(), OrderError> {
        if !self.is_active() {
            return Err(OrderError::NotReplaceable {
                order_id: self.id.clone(),
                status: self.status,
            });
        }
        if new_price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice {
                price: new_price,
                reason: "price must be positive".to_string(),
            });
        }
        self.price = Some(new_price);
        Ok(())
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order({} {} {} {} x{} @ {} {} filled={}/{})",
            self.id,
            self.symbol,
            self.side,
            self.order_type,
            self.qty,
            self.price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "MKT".to_string()),
            self.status,
            self.exec_qty,
            self.qty,
        )
    }
}

/// Builder for constructing orders with validation.
#[derive(Debug)]
pub struct OrderBuilder {
    order_type: OrderType,
    symbol: String,
    side: OrderSide,
    qty: u64,
    price: Option<Decimal>,
    tif: TimeInForce,
    submitted: DateTime<Utc>,
    id: Option<OrderId>,
}

impl OrderBuilder {
    pub fn new(
        order_type: OrderType,
        symbol: impl Into<String>,
        side: OrderSide,
        qty: u64,
        tif: TimeInForce,
        submitted: DateTime<Utc>,
    ) -> Self {
        Self {
            order_type,
            symbol: symbol.into(),
            side,
            qty,
            price: None,
            tif,
            submitted,
            id: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Set an explicit id. The strategy runtime assigns deterministic ids
    /// when none is given here.
    pub fn with_id(mut self, id: impl Into<OrderId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Validate and build the order.
    pub fn build(self) -> Result<Order, OrderError> {
        if self.qty == 0 {
            return Err(OrderError::InvalidQuantity {
                qty: self.qty,
                reason: "quantity must be positive".to_string(),
            });
        }

        if self.order_type.requires_price() {
            match self.price {
                None => {
                    return Err(OrderError::MissingPrice {
                        order_type: self.order_type,
                    })
                }
                Some(price) if price <= Decimal::ZERO => {
                    return Err(OrderError::InvalidPrice {
                        price,
                        reason: "price must be positive".to_string(),
                    });
                }
                Some(_) => {}
            }
        } else if self.price.is_some() {
            return Err(OrderError::UnexpectedPrice {
                order_type: self.order_type,
            });
        }

        // Auction TIF and auction order types imply each other.
        if self.tif == TimeInForce::Auction && !self.order_type.is_auction() {
            return Err(OrderError::InvalidTimeInForce {
                tif: self.tif,
                order_type: self.order_type,
            });
        }
        if self.order_type.is_auction() && self.tif != TimeInForce::Auction {
            return Err(OrderError::InvalidTimeInForce {
                tif: self.tif,
                order_type: self.order_type,
            });
        }

        let id = self
            .id
            .unwrap_or_else(|| OrderId::new(format!("{}-{}-0", self.symbol, self.side)));

        Ok(Order {
            id,
            symbol: self.symbol,
            side: self.side,
            order_type: self.order_type,
            qty: self.qty,
            price: self.price,
            tif: self.tif,
            submitted: self.submitted,
            status: OrderStatus::New,
            exec_qty: 0,
            avg_fill_price: None,
        })
    }
}

/// Errors from order construction and state changes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderError {
    #[error("invalid state transition from {from} to {to} for order {order_id}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
        order_id: OrderId,
    },

    #[error("order {order_id} is closed and cannot be modified")]
    OrderClosed { order_id: OrderId },

    #[error("order {order_id} cannot be replaced in status {status}")]
    NotReplaceable {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("over-fill on order {order_id}: fill_qty={fill_qty} > leaves_qty={leaves_qty}")]
    OverFill {
        order_id: OrderId,
        fill_qty: u64,
        leaves_qty: u64,
    },

    #[error("invalid quantity {qty}: {reason}")]
    InvalidQuantity { qty: u64, reason: String },

    #[error("invalid price {price}: {reason}")]
    InvalidPrice { price: Decimal, reason: String },

    #[error("{order_type} order requires a price")]
    MissingPrice { order_type: OrderType },

    #[error("{order_type} order must not carry a price")]
    UnexpectedPrice { order_type: OrderType },

    #[error("{tif} time-in-force is not valid for {order_type} orders")]
    InvalidTimeInForce {
        tif: TimeInForce,
        order_type: OrderType,
    },

    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error("duplicate order id: {0}")]
    DuplicateOrderId(OrderId),
}
