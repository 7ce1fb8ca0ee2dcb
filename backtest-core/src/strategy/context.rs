//! Strategy-facing state and order API.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::data::{Candle, Tick};
use crate::error::{EngineError, ProtocolError};
use crate::events::{Event, EventPayload};
use crate::orders::{Order, OrderError, OrderId, OrderSide, TimeInForce};
use crate::trades::Trade;

/// Kind of an outstanding request, one half of the tracking token.
///
/// A token is `(RequestKind, OrderId)`; the same key is used on the
/// submission and response paths, so at most one request of each kind can be
/// in flight per order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    New,
    Cancel,
    Replace,
}

/// Per-instrument state owned by the strategy runtime and exposed to user
/// code during callbacks.
#[derive(Debug)]
pub struct StrategyContext {
    symbol: String,
    n_periods: usize,
    /// Rolling tick window, bounded to `n_periods`
    pub ticks: Vec<Tick>,
    /// Rolling candle window, bounded to `n_periods`
    pub candles: Vec<Candle>,
    pub(crate) current_trade: Trade,
    pub(crate) closed_trades: Vec<Trade>,
    last_candle_open: Option<Decimal>,
    last_candle_open_time: Option<DateTime<Utc>>,
    most_recent_time: Option<DateTime<Utc>>,
    pending_requests: HashSet<(RequestKind, OrderId)>,
    outbox: Vec<Event>,
    next_order_seq: u64,
}

impl StrategyContext {
    pub fn new(symbol: impl Into<String>, n_periods: usize) -> Self {
        let symbol = symbol.into();
        Self {
            current_trade: Trade::flat(symbol.clone()),
            symbol,
            n_periods: n_periods.max(1),
            ticks: Vec::new(),
            candles: Vec::new(),
            closed_trades: Vec::new(),
            last_candle_open: None,
            last_candle_open_time: None,
            most_recent_time: None,
            pending_requests: HashSet::new(),
            outbox: Vec::new(),
            next_order_seq: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn n_periods(&self) -> usize {
        self.n_periods
    }

    /// Current simulated time as observed from the event stream.
    pub fn now(&self) -> DateTime<Utc> {
        self.most_recent_time.unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Monotone clock update; never regresses.
    pub(crate) fn observe_time(&mut self, ts: DateTime<Utc>) {
        if self.most_recent_time.map_or(true, |current| ts > current) {
            self.most_recent_time = Some(ts);
        }
    }

    // === Order API ===

    /// Submit a limit order. Returns the deterministic order id.
    pub fn submit_limit_order(
        &mut self,
        side: OrderSide,
        qty: u64,
        price: Decimal,
        tif: TimeInForce,
    ) -> Result<OrderId, EngineError> {
        let submitted = self.now();
        let order = Order::limit(self.symbol.clone(), side, qty, price, tif, submitted)
            .with_id(self.next_order_id(side))
            .build()
            .map_err(EngineError::from)?;
        self.submit_order(order)
    }

    /// Submit a market order.
    pub fn submit_market_order(
        &mut self,
        side: OrderSide,
        qty: u64,
        tif: TimeInForce,
    ) -> Result<OrderId, EngineError> {
        let submitted = self.now();
        let order = Order::market(self.symbol.clone(), side, qty, tif, submitted)
            .with_id(self.next_order_id(side))
            .build()
            .map_err(EngineError::from)?;
        self.submit_order(order)
    }

    /// Submit a pre-built order (stop and auction types).
    pub fn submit_order(&mut self, order: Order) -> Result<OrderId, EngineError> {
        let id = order.id.clone();
        let token = (RequestKind::New, id.clone());
        if self.pending_requests.contains(&token) {
            return Err(ProtocolError::DuplicateRequest(id).into());
        }

        self.current_trade
            .put_new_order(order.clone())
            .map_err(EngineError::from)?;
        self.pending_requests.insert(token);
        trace!(order = %id, "new order request");
        self.outbox.push(Event::new(
            self.symbol.clone(),
            order.submitted,
            EventPayload::NewOrderRequest(order),
        ));
        Ok(id)
    }

    /// Request cancellation of a confirmed order.
    pub fn cancel_order(&mut self, id: &OrderId) -> Result<(), EngineError> {
        if !self.current_trade.has_confirmed_order(id) {
            return Err(OrderError::NotFound(id.clone()).into());
        }
        let token = (RequestKind::Cancel, id.clone());
        if self.pending_requests.contains(&token) {
            return Err(ProtocolError::DuplicateRequest(id.clone()).into());
        }
        self.pending_requests.insert(token);
        self.outbox.push(Event::new(
            self.symbol.clone(),
            self.now(),
            EventPayload::CancelRequest {
                order_id: id.clone(),
            },
        ));
        Ok(())
    }

    /// Request a price replacement on a confirmed order.
    pub fn replace_order(&mut self, id: &OrderId, new_price: Decimal) -> Result<(), EngineError> {
        if !self.current_trade.has_confirmed_order(id) {
            return Err(OrderError::NotFound(id.clone()).into());
        }
        let token = (RequestKind::Replace, id.clone());
        if self.pending_requests.contains(&token) {
            return Err(ProtocolError::DuplicateRequest(id.clone()).into());
        }
        self.pending_requests.insert(token);
        self.outbox.push(Event::new(
            self.symbol.clone(),
            self.now(),
            EventPayload::ReplaceRequest {
                order_id: id.clone(),
                new_price,
            },
        ));
        Ok(())
    }

    // === Queries ===

    /// Orders confirmed and working at the broker.
    pub fn open_orders(&self) -> &HashMap<OrderId, Order> {
        &self.current_trade.confirmed_orders
    }

    pub fn is_order_confirmed(&self, id: &OrderId) -> bool {
        self.current_trade.has_confirmed_order(id)
    }

    /// Signed position: positive long, negative short.
    pub fn position(&self) -> i64 {
        self.current_trade.position()
    }

    /// Realized P&L across closed trades plus the current arc.
    pub fn realized_pnl(&self) -> Decimal {
        self.closed_trades
            .iter()
            .map(|t| t.realized_pnl)
            .sum::<Decimal>()
            + self.current_trade.realized_pnl
    }

    /// Unrealized P&L of the current trade as of the last mark.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.current_trade.unrealized_pnl
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl() + self.unrealized_pnl()
    }

    /// Most recent candle-open price, if any candle has opened.
    pub fn last_candle_open(&self) -> Option<Decimal> {
        self.last_candle_open
    }

    /// Number of requests awaiting a broker response. Zero means quiescent.
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn current_trade(&self) -> &Trade {
        &self.current_trade
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    // === Runtime plumbing ===

    fn next_order_id(&mut self, side: OrderSide) -> OrderId {
        self.next_order_seq += 1;
        OrderId::new(format!("{}-{}-{}", self.symbol, side, self.next_order_seq))
    }

    pub(crate) fn drain_outbox(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    /// Release a tracking token on response arrival.
    pub(crate) fn release_request(&mut self, kind: RequestKind, id: &OrderId) -> bool {
        self.pending_requests.remove(&(kind, id.clone()))
    }

    /// Release every token for an order (request-not-delivered path).
    pub(crate) fn release_all_requests(&mut self, id: &OrderId) {
        for kind in [RequestKind::New, RequestKind::Cancel, RequestKind::Replace] {
            self.pending_requests.remove(&(kind, id.clone()));
        }
    }

    // === Windows ===

    /// Append a tick, evicting the oldest beyond the window bound and
    /// re-sorting on out-of-order arrival.
    pub(crate) fn put_new_tick(&mut self, tick: Tick) {
        let out_of_order = self
            .ticks
            .last()
            .is_some_and(|last| tick.datetime < last.datetime);
        if self.ticks.len() >= self.n_periods {
            self.ticks.remove(0);
        }
        self.ticks.push(tick);
        if out_of_order {
            self.ticks.sort_by_key(|t| t.datetime);
        }
    }

    /// Append a candle; same eviction and re-sort rules as ticks.
    pub(crate) fn put_new_candle(&mut self, candle: Candle) {
        let out_of_order = self
            .candles
            .last()
            .is_some_and(|last| candle.datetime < last.datetime);
        if self.candles.len() >= self.n_periods {
            self.candles.remove(0);
        }
        self.candles.push(candle);
        if out_of_order {
            self.candles.sort_by_key(|c| c.datetime);
        }
        self.refresh_last_candle_open();
    }

    /// Bulk-load historical ticks: merge, keep valid ones, stable-sort,
    /// truncate to the last N.
    ///
    /// Unlike candles, ticks sharing a timestamp are all admitted; only
    /// exact duplicates collapse, so reloading the same history is a no-op.
    pub(crate) fn load_tick_history(&mut self, history: Vec<Tick>) {
        let mut merged: Vec<Tick> = std::mem::take(&mut self.ticks);
        merged.extend(history);
        merged.retain(|t| t.validate().is_ok());

        let mut unique: Vec<Tick> = Vec::with_capacity(merged.len());
        for tick in merged {
            if !unique.contains(&tick) {
                unique.push(tick);
            }
        }
        unique.sort_by_key(|t| t.datetime);
        if unique.len() > self.n_periods {
            unique.drain(..unique.len() - self.n_periods);
        }
        self.ticks = unique;
    }

    /// Bulk-load historical candles: merge, de-duplicate by datetime,
    /// stable-sort, truncate to the last N.
    pub(crate) fn load_candle_history(&mut self, history: Vec<Candle>) {
        let mut merged: Vec<Candle> = std::mem::take(&mut self.candles);
        merged.extend(history);
        merged.retain(|c| c.validate().is_ok());

        let mut seen = HashSet::new();
        merged.retain(|c| seen.insert(c.datetime));
        merged.sort_by_key(|c| c.datetime);
        if merged.len() > self.n_periods {
            merged.drain(..merged.len() - self.n_periods);
        }
        self.candles = merged;
        self.refresh_last_candle_open();
    }

    pub(crate) fn observe_candle_open(&mut self, ts: DateTime<Utc>, price: Decimal) {
        if self.last_candle_open_time.map_or(true, |last| ts >= last) {
            self.last_candle_open = Some(price);
            self.last_candle_open_time = Some(ts);
        }
    }

    fn refresh_last_candle_open(&mut self) {
        if let Some(last) = self.candles.last() {
            if self
                .last_candle_open_time
                .map_or(true, |current| last.datetime > current)
            {
                self.last_candle_open = Some(last.open);
                self.last_candle_open_time = Some(last.datetime);
            }
        }
    }
}
