//! Trade position arcs and fill accounting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::orders::{Order, OrderError, OrderId, OrderStatus};

/// Stage of a position arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeKind {
    /// No position yet
    Flat,
    /// Net long
    Long,
    /// Net short
    Short,
    /// Arc finished, position returned to zero
    Closed,
}

impl TradeKind {
    /// Position direction sign: +1 long, -1 short, 0 otherwise.
    pub fn sign(&self) -> i64 {
        match self {
            TradeKind::Long => 1,
            TradeKind::Short => -1,
            TradeKind::Flat | TradeKind::Closed => 0,
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Flat => write!(f, "FLAT"),
            TradeKind::Long => write!(f, "LONG"),
            TradeKind::Short => write!(f, "SHORT"),
            TradeKind::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One execution applied to a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub qty: u64,
    pub price: Decimal,
    pub ts: DateTime<Utc>,
}

/// Errors from trade accounting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TradeError {
    #[error("order {0} not known to this trade")]
    UnknownOrder(OrderId),

    #[error("order {0} already exists on this trade")]
    DuplicateOrder(OrderId),

    #[error("order {order_id} is not fillable in state {status}")]
    NotFillable {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("fill received after trade closed")]
    FillAfterClose,

    #[error("invalid fill: {0}")]
    InvalidFill(String),

    #[error("trade is not open")]
    NotOpen,

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// A position arc for a single instrument.
///
/// Born Flat; the first fill turns it Long or Short; opposing fills realize
/// P&L; when the position reaches zero the trade becomes Closed and
/// [`Trade::apply_fill`] returns the successor that becomes current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub kind: TradeKind,
    /// Unsigned quantity held; direction lives in `kind`
    pub qty: u64,
    /// Quantity-weighted average open price
    pub avg_open_price: Decimal,
    /// P&L realized by offsetting fills on this arc
    pub realized_pnl: Decimal,
    /// P&L as of the last mark while open; zero once closed
    pub unrealized_pnl: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Orders submitted but not yet acknowledged
    pub pending_orders: HashMap<OrderId, Order>,
    /// Orders working at the broker
    pub confirmed_orders: HashMap<OrderId, Order>,
    /// Filled, canceled and rejected orders
    pub terminal_orders: HashMap<OrderId, Order>,
    /// Executions in arrival order
    pub fills: Vec<Fill>,
}

impl Trade {
    /// A fresh Flat trade for `symbol`.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: TradeKind::Flat,
            qty: 0,
            avg_open_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            opened_at: None,
            closed_at: None,
            pending_orders: HashMap::new(),
            confirmed_orders: HashMap::new(),
            terminal_orders: HashMap::new(),
            fills: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.kind, TradeKind::Long | TradeKind::Short)
    }

    /// Signed position: positive long, negative short.
    pub fn position(&self) -> i64 {
        self.kind.sign() * self.qty as i64
    }

    pub fn has_confirmed_order(&self, id: &OrderId) -> bool {
        self.confirmed_orders.contains_key(id)
    }

    fn knows_order(&self, id: &OrderId) -> bool {
        self.pending_orders.contains_key(id)
            || self.confirmed_orders.contains_key(id)
            || self.terminal_orders.contains_key(id)
    }

    // === Order set management ===

    /// Register a freshly submitted order on this trade.
    pub fn put_new_order(&mut self, order: Order) -> Result<(), TradeError> {
        if order.status != OrderStatus::New {
            return Err(TradeError::NotFillable {
                order_id: order.id.clone(),
                status: order.status,
            });
        }
        if self.knows_order(&order.id) {
            return Err(TradeError::DuplicateOrder(order.id));
        }
        self.pending_orders.insert(order.id.clone(), order);
        Ok(())
    }

    /// Broker acknowledged the order: pending -> confirmed.
    pub fn confirm_order(&mut self, id: &OrderId) -> Result<(), TradeError> {
        let mut order = self
            .pending_orders
            .remove(id)
            .ok_or_else(|| TradeError::UnknownOrder(id.clone()))?;
        order.transition_to(OrderStatus::Confirmed)?;
        self.confirmed_orders.insert(id.clone(), order);
        Ok(())
    }

    /// Broker rejected the order: pending -> terminal.
    pub fn reject_order(&mut self, id: &OrderId) -> Result<(), TradeError> {
        let mut order = self
            .pending_orders
            .remove(id)
            .ok_or_else(|| TradeError::UnknownOrder(id.clone()))?;
        order.transition_to(OrderStatus::Rejected)?;
        self.terminal_orders.insert(id.clone(), order);
        Ok(())
    }

    /// Order canceled or expired: confirmed -> terminal.
    pub fn cancel_order(&mut self, id: &OrderId) -> Result<(), TradeError> {
        let mut order = self
            .confirmed_orders
            .remove(id)
            .ok_or_else(|| TradeError::UnknownOrder(id.clone()))?;
        order.cancel()?;
        self.terminal_orders.insert(id.clone(), order);
        Ok(())
    }

    /// Working price replaced on a confirmed order.
    pub fn replace_order(&mut self, id: &OrderId, new_price: Decimal) -> Result<(), TradeError> {
        let order = self
            .confirmed_orders
            .get_mut(id)
            .ok_or_else(|| TradeError::UnknownOrder(id.clone()))?;
        order.replace_price(new_price)?;
        Ok(())
    }

    // === Fills ===

    /// Apply an execution to this trade.
    ///
    /// Returns the successor trade when this arc closes: offsetting fills
    /// that zero the position finalize the arc, and any excess quantity
    /// opens the successor on the opposite side at the fill price. Working
    /// orders migrate to the successor so later events still resolve by id.
    pub fn apply_fill(
        &mut self,
        id: &OrderId,
        fill_qty: u64,
        fill_price: Decimal,
        ts: DateTime<Utc>,
    ) -> Result<Option<Trade>, TradeError> {
        if self.kind == TradeKind::Closed {
            return Err(TradeError::FillAfterClose);
        }
        if fill_qty == 0 {
            return Err(TradeError::InvalidFill(
                "fill quantity must be positive".to_string(),
            ));
        }
        if fill_price <= Decimal::ZERO {
            return Err(TradeError::InvalidFill(
                "fill price must be positive".to_string(),
            ));
        }

        let order = self
            .confirmed_orders
            .get_mut(id)
            .ok_or_else(|| TradeError::UnknownOrder(id.clone()))?;
        if !order.status.is_active() {
            return Err(TradeError::NotFillable {
                order_id: id.clone(),
                status: order.status,
            });
        }

        let side_sign = order.side.sign();
        order.apply_fill(fill_qty, fill_price)?;
        if order.is_terminal() {
            let order = self.confirmed_orders.remove(id).expect("order present");
            self.terminal_orders.insert(id.clone(), order);
        }

        let position = self.position();
        let delta = side_sign * fill_qty as i64;

        if position == 0 || position.signum() == delta.signum() {
            // Opening or extending: quantity-weighted average open price.
            let held = Decimal::from(self.qty);
            let incoming = Decimal::from(fill_qty);
            self.avg_open_price = if self.qty == 0 {
                fill_price
            } else {
                (self.avg_open_price * held + fill_price * incoming) / (held + incoming)
            };
            self.qty += fill_qty;
            if self.kind == TradeKind::Flat {
                self.kind = if delta > 0 {
                    TradeKind::Long
                } else {
                    TradeKind::Short
                };
                self.opened_at = Some(ts);
            }
            self.fills.push(Fill {
                order_id: id.clone(),
                qty: fill_qty,
                price: fill_price,
                ts,
            });
            return Ok(None);
        }

        // Offsetting fill: realize P&L on the closed portion.
        let direction = self.kind.sign();
        let closed_qty = self.qty.min(fill_qty);
        self.realized_pnl += (fill_price - self.avg_open_price)
            * Decimal::from(closed_qty)
            * Decimal::from(direction);
        self.fills.push(Fill {
            order_id: id.clone(),
            qty: closed_qty,
            price: fill_price,
            ts,
        });

        if fill_qty < self.qty {
            self.qty -= fill_qty;
            return Ok(None);
        }

        // Arc closes; residual (if any) opens the successor on the other side.
        let residual = fill_qty - self.qty;
        self.qty = 0;
        self.kind = TradeKind::Closed;
        self.unrealized_pnl = Decimal::ZERO;
        self.closed_at = Some(ts);

        let mut successor = Trade::flat(self.symbol.clone());
        successor.pending_orders = std::mem::take(&mut self.pending_orders);
        successor.confirmed_orders = std::mem::take(&mut self.confirmed_orders);

        if residual > 0 {
            successor.kind = if delta > 0 {
                TradeKind::Long
            } else {
                TradeKind::Short
            };
            successor.qty = residual;
            successor.avg_open_price = fill_price;
            successor.opened_at = Some(ts);
            successor.fills.push(Fill {
                order_id: id.clone(),
                qty: residual,
                price: fill_price,
                ts,
            });
        }

        Ok(Some(successor))
    }

    /// Recompute unrealized P&L against a new price point.
    pub fn mark_to_market(&mut self, price: Decimal) -> Result<(), TradeError> {
        if !self.is_open() {
            return Err(TradeError::NotOpen);
        }
        self.unrealized_pnl = (price - self.avg_open_price)
            * Decimal::from(self.qty)
            * Decimal::from(self.kind.sign());
        Ok(())
    }

    /// Realized plus marked unrealized P&L.
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade({} {} x{} @ {} realized={} unrealized={})",
            self.symbol,
            self.kind,
            self.qty,
            self.avg_open_price,
            self.realized_pnl,
            self.unrealized_pnl,
        )
    }
}
