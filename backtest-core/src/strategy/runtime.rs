//! Per-instrument strategy runtime: event dispatch and trade bookkeeping.

use tracing::{debug, warn};

use super::context::{RequestKind, StrategyContext};
use super::Strategy;
use crate::error::{EngineError, FatalError, ProtocolError, TradeError};
use crate::events::{Event, EventPayload};
use crate::orders::OrderId;
use crate::portfolio::PositionEvent;
use crate::trades::TradeKind;

/// Result of dispatching one event: requests the user issued, position
/// changes to publish, and non-fatal errors to surface.
#[derive(Debug, Default)]
pub struct RuntimeOutput {
    pub requests: Vec<Event>,
    pub position_events: Vec<PositionEvent>,
    pub errors: Vec<EngineError>,
}

/// Drives one user strategy over one instrument's event stream.
///
/// Handlers run to completion per event; the runtime owns all mutable state,
/// so no locking is involved.
pub struct StrategyRuntime {
    ctx: StrategyContext,
    user: Box<dyn Strategy>,
    /// Every event observed, in delivery order, when journaling is on
    journal: Option<Vec<Event>>,
}

impl StrategyRuntime {
    pub fn new(symbol: impl Into<String>, n_periods: usize, user: Box<dyn Strategy>) -> Self {
        Self {
            ctx: StrategyContext::new(symbol, n_periods),
            user,
            journal: None,
        }
    }

    /// Record every delivered event for the run report.
    pub fn with_journal(mut self) -> Self {
        self.journal = Some(Vec::new());
        self
    }

    pub fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    /// Take the recorded journal, if journaling was enabled.
    pub fn take_journal(&mut self) -> Vec<Event> {
        self.journal.take().unwrap_or_default()
    }

    /// Consume the runtime, returning its final context.
    pub fn into_context(self) -> StrategyContext {
        self.ctx
    }

    /// Dispatch one event delivered by the broker.
    pub fn handle_event(&mut self, event: &Event) -> RuntimeOutput {
        let mut output = RuntimeOutput::default();

        if let Some(journal) = &mut self.journal {
            journal.push(event.clone());
        }
        self.ctx.observe_time(event.ts);

        match &event.payload {
            EventPayload::TickArrived(tick) => {
                if let Err(err) = tick.validate() {
                    output.errors.push(err.into());
                } else {
                    self.on_tick(tick.clone());
                }
            }
            EventPayload::CandleOpen { price, .. } => {
                self.ctx.observe_candle_open(event.ts, *price);
                if self.ctx.current_trade().is_open() {
                    let _ = self.ctx.current_trade.mark_to_market(*price);
                }
                if self.ctx.candles.len() >= self.ctx.n_periods() {
                    self.user.on_candle_open(&mut self.ctx, *price);
                }
            }
            EventPayload::CandleClose(candle) => {
                if let Err(err) = candle.validate() {
                    output.errors.push(err.into());
                } else {
                    let candle = candle.clone();
                    self.ctx.put_new_candle(candle.clone());
                    if self.ctx.current_trade().is_open() {
                        let _ = self.ctx.current_trade.mark_to_market(candle.close);
                    }
                    if self.ctx.candles.len() >= self.ctx.n_periods() {
                        self.user.on_candle_close(&mut self.ctx, &candle);
                    }
                }
            }
            EventPayload::TickHistory(ticks) => {
                self.ctx.load_tick_history(ticks.clone());
            }
            EventPayload::CandleHistory(candles) => {
                self.ctx.load_candle_history(candles.clone());
            }
            EventPayload::EndOfData => {
                debug!(symbol = %event.symbol, "end of data reached");
            }

            EventPayload::OrderConfirmed { order_id } => {
                self.ctx.release_request(RequestKind::New, order_id);
                if let Err(err) = self.ctx.current_trade.confirm_order(order_id) {
                    output.errors.push(Self::map_trade_error(err, order_id, "confirm"));
                }
            }
            EventPayload::OrderRejected { order_id, reason } => {
                warn!(order = %order_id, %reason, "order rejected");
                self.ctx.release_request(RequestKind::New, order_id);
                if let Err(err) = self.ctx.current_trade.reject_order(order_id) {
                    output.errors.push(Self::map_trade_error(err, order_id, "reject"));
                }
            }
            EventPayload::OrderFilled {
                order_id,
                price,
                qty,
            } => {
                self.on_fill(order_id, *qty, *price, event, &mut output);
            }
            EventPayload::OrderCanceled { order_id } => {
                self.ctx.release_request(RequestKind::Cancel, order_id);
                if let Err(err) = self.ctx.current_trade.cancel_order(order_id) {
                    output.errors.push(Self::map_trade_error(err, order_id, "cancel"));
                }
            }
            EventPayload::OrderReplaced {
                order_id,
                new_price,
            } => {
                self.ctx.release_request(RequestKind::Replace, order_id);
                if let Err(err) = self.ctx.current_trade.replace_order(order_id, *new_price) {
                    output.errors.push(Self::map_trade_error(err, order_id, "replace"));
                }
            }
            EventPayload::CancelRejected { order_id, reason } => {
                warn!(order = %order_id, %reason, "cancel rejected");
                self.ctx.release_request(RequestKind::Cancel, order_id);
            }
            EventPayload::ReplaceRejected { order_id, reason } => {
                warn!(order = %order_id, %reason, "replace rejected");
                self.ctx.release_request(RequestKind::Replace, order_id);
            }
            EventPayload::RequestNotDelivered { order_id, reason } => {
                self.ctx.release_all_requests(order_id);
                output.errors.push(
                    ProtocolError::RequestNotDelivered {
                        order_id: order_id.clone(),
                        reason: reason.clone(),
                    }
                    .into(),
                );
            }

            EventPayload::NewOrderRequest(_)
            | EventPayload::CancelRequest { .. }
            | EventPayload::ReplaceRequest { .. } => {
                output.errors.push(
                    FatalError::PipelineBroken(format!(
                        "request payload {} delivered to strategy runtime",
                        event.payload.name()
                    ))
                    .into(),
                );
            }
        }

        output.requests = self.ctx.drain_outbox();
        output
    }

    fn on_tick(&mut self, tick: crate::data::Tick) {
        self.ctx.put_new_tick(tick.clone());
        if self.ctx.current_trade().is_open() {
            if let Some(last) = tick.last_price() {
                let _ = self.ctx.current_trade.mark_to_market(last);
            }
        }
        if self.ctx.ticks.len() >= self.ctx.n_periods() {
            self.user.on_tick(&mut self.ctx, &tick);
        }
    }

    fn on_fill(
        &mut self,
        order_id: &OrderId,
        qty: u64,
        price: rust_decimal::Decimal,
        event: &Event,
        output: &mut RuntimeOutput,
    ) {
        let was_flat = self.ctx.current_trade().kind == TradeKind::Flat;

        match self.ctx.current_trade.apply_fill(order_id, qty, price, event.ts) {
            Ok(Some(successor)) => {
                if self.ctx.current_trade.kind != TradeKind::Closed {
                    output.errors.push(
                        FatalError::CorruptedOrderState {
                            order_id: order_id.clone(),
                            reason: "successor created while current trade still open".to_string(),
                        }
                        .into(),
                    );
                    return;
                }
                let closed = std::mem::replace(&mut self.ctx.current_trade, successor);
                let closed_realized = closed.realized_pnl;
                self.ctx.closed_trades.push(closed);

                // Reversal: the successor is born open.
                if self.ctx.current_trade.is_open() {
                    output.position_events.push(PositionEvent {
                        symbol: event.symbol.clone(),
                        ts: event.ts,
                        kind: self.ctx.current_trade.kind,
                        qty: self.ctx.current_trade.qty,
                        avg_open_price: self.ctx.current_trade.avg_open_price,
                        closed_realized_pnl: closed_realized,
                    });
                }
            }
            Ok(None) => {
                if was_flat && self.ctx.current_trade.is_open() {
                    output.position_events.push(PositionEvent {
                        symbol: event.symbol.clone(),
                        ts: event.ts,
                        kind: self.ctx.current_trade.kind,
                        qty: self.ctx.current_trade.qty,
                        avg_open_price: self.ctx.current_trade.avg_open_price,
                        closed_realized_pnl: rust_decimal::Decimal::ZERO,
                    });
                }
            }
            Err(err) => {
                output.errors.push(Self::map_trade_error(err, order_id, "fill"));
            }
        }
    }

    fn map_trade_error(err: TradeError, order_id: &OrderId, action: &str) -> EngineError {
        match err {
            TradeError::UnknownOrder(id) if action == "fill" => {
                ProtocolError::FillForUnknownOrder(id).into()
            }
            TradeError::UnknownOrder(id) if action == "confirm" => {
                ProtocolError::ConfirmForUnknownOrder(id).into()
            }
            TradeError::UnknownOrder(id) => ProtocolError::ResponseForUnknownOrder {
                kind: action.to_string(),
                order_id: id,
            }
            .into(),
            other => {
                let _ = order_id;
                EngineError::Trade(other)
            }
        }
    }
}
