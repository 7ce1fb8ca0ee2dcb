//! Per-instrument simulated broker.
//!
//! The broker is the authority for order state on the exchange side. It
//! accepts requests through the latency-delayed arrival queue, expires
//! time-in-force before matching on every market-data arrival, matches
//! active orders, and emits lifecycle events through the pending buffer so
//! the stream handed to the strategy is non-decreasing in simulated time.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use super::inflight::RequestQueue;
use super::latency::LatencyModel;
use super::matching::{match_candle_close, match_candle_open, match_tick, MatchOutcome};
use super::pending::PendingEvents;
use crate::error::{EngineError, FatalError, ProtocolError};
use crate::events::{Event, EventPayload};
use crate::instruments::Instrument;
use crate::orders::{Order, OrderId, OrderStatus, TimeInForce};

/// Result of feeding one market-data event to the broker: the ordered batch
/// for the strategy runtime plus any non-fatal errors to surface.
#[derive(Debug, Default)]
pub struct BrokerOutput {
    pub events: Vec<Event>,
    pub errors: Vec<EngineError>,
}

/// Broker-side order record.
#[derive(Debug, Clone)]
struct BrokerOrder {
    order: Order,
    /// Last state-update instant; an order matches only against market data
    /// strictly later than this (the latency dead zone)
    state_ts: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Simulated exchange endpoint for a single instrument.
#[derive(Debug)]
pub struct SimulatedBroker {
    instrument: Instrument,
    latency: LatencyModel,
    strict_limit: bool,
    orders: HashMap<OrderId, BrokerOrder>,
    requests: RequestQueue,
    pending: PendingEvents,
}

impl SimulatedBroker {
    pub fn new(instrument: Instrument, latency: LatencyModel, strict_limit: bool) -> Self {
        Self {
            instrument,
            latency,
            strict_limit,
            orders: HashMap::new(),
            requests: RequestQueue::new(),
            pending: PendingEvents::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    /// Count of orders eligible for matching.
    pub fn active_order_count(&self) -> usize {
        self.orders
            .values()
            .filter(|b| b.order.is_active())
            .count()
    }

    /// Requests still in flight towards the broker.
    pub fn inflight_request_count(&self) -> usize {
        self.requests.len()
    }

    /// Generated events not yet released downstream.
    pub fn pending_event_count(&self) -> usize {
        self.pending.len()
    }

    /// Broker-side view of an order.
    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id).map(|b| &b.order)
    }

    /// Queue a strategy request; it becomes visible after the single-trip
    /// latency. The event's own timestamp is the submission time.
    pub fn submit_request(&mut self, event: Event) {
        debug_assert!(event.payload.is_request());
        let visible_at = self.latency.visibility(event.ts);
        trace!(symbol = %event.symbol, request = event.payload.name(), %visible_at, "request queued");
        self.requests.push(event, visible_at);
    }

    /// Feed one market-data event at time `T`.
    ///
    /// Order of operations: TIF expiry, request intake (visibility <= T),
    /// matching, then release of pending events stamped <= T ahead of the
    /// market-data event itself.
    pub fn on_market_event(&mut self, event: &Event) -> BrokerOutput {
        let mut output = BrokerOutput::default();
        let now = event.ts;

        // Broken data is dropped before it can drive matching.
        match &event.payload {
            EventPayload::TickArrived(tick) => {
                if let Err(err) = tick.validate() {
                    warn!(symbol = %event.symbol, %err, "dropping broken tick");
                    output.errors.push(err.into());
                    return output;
                }
            }
            EventPayload::CandleClose(candle) => {
                if let Err(err) = candle.validate() {
                    warn!(symbol = %event.symbol, %err, "dropping invalid candle");
                    output.errors.push(err.into());
                    return output;
                }
            }
            EventPayload::EndOfData => return self.on_end_of_data(event),
            _ => {}
        }

        self.expire_orders(now);
        self.process_visible_requests(now, &mut output);

        match &event.payload {
            EventPayload::TickArrived(tick) => self.match_against_tick(tick, now, &mut output),
            EventPayload::CandleOpen { price, timeframe } => {
                let session_open = self
                    .instrument
                    .schedule
                    .is_session_open_candle(now, *timeframe);
                self.match_against_candle_open(*price, session_open, now, &mut output);
            }
            EventPayload::CandleClose(candle) => {
                let session_close = self
                    .instrument
                    .schedule
                    .is_session_close_candle(candle.datetime, candle.timeframe);
                self.match_against_candle_close(candle, session_close, now, &mut output);
            }
            // History backfill passes through; nothing to match.
            _ => {}
        }

        output.events = self.pending.release_until(now);
        output.events.push(event.clone());
        output
    }

    /// EndOfData: flush everything still buffered, fail requests that never
    /// arrived, and forward the marker last.
    fn on_end_of_data(&mut self, event: &Event) -> BrokerOutput {
        let mut output = BrokerOutput::default();

        for request in self.requests.pop_visible(DateTime::<Utc>::MAX_UTC) {
            if let Some(order_id) = request.payload.order_id().cloned() {
                let reason = "end of data reached before broker receipt".to_string();
                output.errors.push(
                    ProtocolError::RequestNotDelivered {
                        order_id: order_id.clone(),
                        reason: reason.clone(),
                    }
                    .into(),
                );
                self.pending.push(Event::new(
                    self.instrument.symbol.clone(),
                    event.ts,
                    EventPayload::RequestNotDelivered { order_id, reason },
                ));
            }
        }

        output.events = self.pending.drain_all();
        // Flushed events may be stamped past the marker; forward EndOfData at
        // the latest flushed instant so the stream stays non-decreasing.
        let mut end = event.clone();
        if let Some(last) = output.events.last() {
            end.ts = end.ts.max(last.ts);
        }
        output.events.push(end);
        output
    }

    // === TIF expiry ===

    fn expire_orders(&mut self, now: DateTime<Utc>) {
        let mut expired: Vec<(OrderId, DateTime<Utc>)> = self
            .orders
            .iter()
            .filter(|(_, b)| b.order.is_active() && b.expires_at <= now)
            .map(|(id, b)| (id.clone(), b.expires_at))
            .collect();
        // Deterministic emission order.
        expired.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        for (id, expires_at) in expired {
            let broker_order = self.orders.get_mut(&id).expect("expired order present");
            if broker_order.order.cancel().is_ok() {
                debug!(order = %id, %expires_at, "order expired");
                self.pending.push(Event::new(
                    self.instrument.symbol.clone(),
                    expires_at,
                    EventPayload::OrderCanceled { order_id: id },
                ));
            }
        }
    }

    fn expiry_for(&self, order: &Order) -> DateTime<Utc> {
        let schedule = &self.instrument.schedule;
        match order.tif {
            TimeInForce::GTC => order.submitted + Duration::days(3650),
            TimeInForce::Day => schedule.day_expiry(order.submitted),
            TimeInForce::Auction => {
                if order.order_type.fires_on_open() {
                    schedule.open_auction_deadline(order.submitted)
                } else {
                    schedule.close_auction_deadline(order.submitted)
                }
            }
        }
    }

    // === Request intake ===

    fn process_visible_requests(&mut self, now: DateTime<Utc>, output: &mut BrokerOutput) {
        for request in self.requests.pop_visible(now) {
            let submitted = request.ts;
            match request.payload {
                EventPayload::NewOrderRequest(order) => {
                    self.process_new_order(order, submitted);
                }
                EventPayload::CancelRequest { order_id } => {
                    self.process_cancel(&order_id, submitted);
                }
                EventPayload::ReplaceRequest {
                    order_id,
                    new_price,
                } => {
                    self.process_replace(&order_id, new_price, submitted);
                }
                other => {
                    output.errors.push(
                        FatalError::CorruptedOrderState {
                            order_id: OrderId::new("<none>"),
                            reason: format!("non-request payload {} in arrival queue", other.name()),
                        }
                        .into(),
                    );
                }
            }
        }
    }

    fn process_new_order(&mut self, mut order: Order, submitted: DateTime<Utc>) {
        let response_ts = self.latency.response_ts(submitted);

        if let Err(err) = order.validate() {
            self.push_response(
                response_ts,
                EventPayload::OrderRejected {
                    order_id: order.id.clone(),
                    reason: err.to_string(),
                },
            );
            return;
        }
        if self.orders.contains_key(&order.id) {
            self.push_response(
                response_ts,
                EventPayload::OrderRejected {
                    order_id: order.id.clone(),
                    reason: "order with this id already exists on broker side".to_string(),
                },
            );
            return;
        }
        if order.transition_to(OrderStatus::Confirmed).is_err() {
            self.push_response(
                response_ts,
                EventPayload::OrderRejected {
                    order_id: order.id.clone(),
                    reason: format!("order not confirmable in state {}", order.status),
                },
            );
            return;
        }

        let id = order.id.clone();
        let expires_at = self.expiry_for(&order);
        let state_ts = self.latency.visibility(submitted);
        debug!(order = %id, %expires_at, "order confirmed");
        self.orders.insert(
            id.clone(),
            BrokerOrder {
                order,
                state_ts,
                expires_at,
            },
        );
        self.push_response(response_ts, EventPayload::OrderConfirmed { order_id: id });
    }

    fn process_cancel(&mut self, order_id: &OrderId, submitted: DateTime<Utc>) {
        let response_ts = self.latency.response_ts(submitted);

        let Some(broker_order) = self.orders.get_mut(order_id) else {
            self.push_response(
                response_ts,
                EventPayload::CancelRejected {
                    order_id: order_id.clone(),
                    reason: "order unknown to broker".to_string(),
                },
            );
            return;
        };

        if let Some(reason) = Self::terminal_reason(&broker_order.order) {
            self.push_response(
                response_ts,
                EventPayload::CancelRejected {
                    order_id: order_id.clone(),
                    reason,
                },
            );
            return;
        }

        if broker_order.order.cancel().is_ok() {
            debug!(order = %order_id, "order canceled by request");
            self.push_response(
                response_ts,
                EventPayload::OrderCanceled {
                    order_id: order_id.clone(),
                },
            );
        }
    }

    fn process_replace(&mut self, order_id: &OrderId, new_price: Decimal, submitted: DateTime<Utc>) {
        let response_ts = self.latency.response_ts(submitted);
        let visibility = self.latency.visibility(submitted);

        let Some(broker_order) = self.orders.get_mut(order_id) else {
            self.push_response(
                response_ts,
                EventPayload::ReplaceRejected {
                    order_id: order_id.clone(),
                    reason: "order unknown to broker".to_string(),
                },
            );
            return;
        };

        if let Some(reason) = Self::terminal_reason(&broker_order.order) {
            self.push_response(
                response_ts,
                EventPayload::ReplaceRejected {
                    order_id: order_id.clone(),
                    reason,
                },
            );
            return;
        }

        match broker_order.order.replace_price(new_price) {
            Ok(()) => {
                // Working price changes from this moment; the order re-enters
                // the dead zone until the next market data.
                broker_order.state_ts = visibility;
                debug!(order = %order_id, %new_price, "order replaced");
                self.push_response(
                    response_ts,
                    EventPayload::OrderReplaced {
                        order_id: order_id.clone(),
                        new_price,
                    },
                );
            }
            Err(err) => {
                self.push_response(
                    response_ts,
                    EventPayload::ReplaceRejected {
                        order_id: order_id.clone(),
                        reason: err.to_string(),
                    },
                );
            }
        }
    }

    fn terminal_reason(order: &Order) -> Option<String> {
        match order.status {
            OrderStatus::Filled => Some("order is already filled".to_string()),
            OrderStatus::Canceled => Some("order is already canceled".to_string()),
            OrderStatus::Rejected => Some("order was rejected".to_string()),
            OrderStatus::New => Some("order is not yet confirmed".to_string()),
            OrderStatus::Confirmed | OrderStatus::PartialFilled => None,
        }
    }

    // === Matching ===

    /// Active orders whose last state update strictly precedes `now`,
    /// in deterministic submission order.
    fn matchable_ids(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        let mut ids: Vec<(DateTime<Utc>, OrderId)> = self
            .orders
            .iter()
            .filter(|(_, b)| b.order.is_active() && b.state_ts < now)
            .map(|(id, b)| (b.order.submitted, id.clone()))
            .collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn match_against_tick(&mut self, tick: &crate::data::Tick, now: DateTime<Utc>, output: &mut BrokerOutput) {
        for id in self.matchable_ids(now) {
            let broker_order = self.orders.get(&id).expect("matchable order present");
            let outcome = match_tick(&broker_order.order, tick, self.strict_limit);
            self.apply_outcome(&id, outcome, now, output);
        }
    }

    fn match_against_candle_open(
        &mut self,
        open: Decimal,
        session_open: bool,
        now: DateTime<Utc>,
        output: &mut BrokerOutput,
    ) {
        for id in self.matchable_ids(now) {
            let broker_order = self.orders.get(&id).expect("matchable order present");
            let outcome =
                match_candle_open(&broker_order.order, open, session_open, self.strict_limit);
            self.apply_outcome(&id, outcome, now, output);
        }
    }

    fn match_against_candle_close(
        &mut self,
        candle: &crate::data::Candle,
        session_close: bool,
        now: DateTime<Utc>,
        output: &mut BrokerOutput,
    ) {
        for id in self.matchable_ids(now) {
            let broker_order = self.orders.get(&id).expect("matchable order present");
            let outcome =
                match_candle_close(&broker_order.order, candle, session_close, self.strict_limit);
            self.apply_outcome(&id, outcome, now, output);
        }
    }

    fn apply_outcome(
        &mut self,
        id: &OrderId,
        outcome: MatchOutcome,
        now: DateTime<Utc>,
        output: &mut BrokerOutput,
    ) {
        let response_ts = now + self.latency.round_trip();
        match outcome {
            MatchOutcome::None => {}
            MatchOutcome::Fill { qty, price } => {
                self.fill_order(id, qty, price, response_ts, output);
            }
            MatchOutcome::FillThenCancel { qty, price } => {
                self.fill_order(id, qty, price, response_ts, output);
                self.cancel_after_match(id, response_ts);
            }
            MatchOutcome::Cancel => {
                self.cancel_after_match(id, response_ts);
            }
        }
    }

    fn fill_order(
        &mut self,
        id: &OrderId,
        qty: u64,
        price: Decimal,
        response_ts: DateTime<Utc>,
        output: &mut BrokerOutput,
    ) {
        let broker_order = self.orders.get_mut(id).expect("filled order present");
        match broker_order.order.apply_fill(qty, price) {
            Ok(()) => {
                trace!(order = %id, qty, %price, "fill");
                self.pending.push(Event::new(
                    self.instrument.symbol.clone(),
                    response_ts,
                    EventPayload::OrderFilled {
                        order_id: id.clone(),
                        price,
                        qty,
                    },
                ));
            }
            Err(err) => {
                output.errors.push(
                    FatalError::CorruptedOrderState {
                        order_id: id.clone(),
                        reason: err.to_string(),
                    }
                    .into(),
                );
            }
        }
    }

    fn cancel_after_match(&mut self, id: &OrderId, response_ts: DateTime<Utc>) {
        let broker_order = self.orders.get_mut(id).expect("canceled order present");
        if broker_order.order.cancel().is_ok() {
            self.pending.push(Event::new(
                self.instrument.symbol.clone(),
                response_ts,
                EventPayload::OrderCanceled {
                    order_id: id.clone(),
                },
            ));
        }
    }

    fn push_response(&mut self, ts: DateTime<Utc>, payload: EventPayload) {
        self.pending
            .push(Event::new(self.instrument.symbol.clone(), ts, payload));
    }
}
