//! Consolidated error handling for the engine.
//!
//! Errors fall into the taxonomy used across the pipeline:
//! - [`DataError`] — malformed market data (broken ticks, bad candles)
//! - [`ProtocolError`] — lifecycle events that contradict known order state
//! - [`FatalError`] — broken invariants that abort the run
//!
//! Non-fatal errors are surfaced on the engine's error channel and the
//! offending event is dropped; fatal errors terminate the pipeline. Use
//! [`EngineError::is_fatal`] to classify.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::orders::{OrderError, OrderId};
pub use crate::trades::TradeError;

/// Market-data validation errors.
///
/// The offending event is discarded; processing continues.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DataError {
    /// Tick failed validation (missing legs, non-positive fields)
    #[error("broken tick for {symbol}: {reason}")]
    BrokenTick { symbol: String, reason: String },

    /// Candle failed its OHLC invariant
    #[error("invalid candle for {symbol}: {reason}")]
    InvalidCandle { symbol: String, reason: String },

    /// Market data arrived out of chronological order
    #[error("out-of-order market data for {symbol}: {got} after {prev}")]
    OutOfOrder {
        symbol: String,
        prev: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

/// Lifecycle events that contradict known order state.
///
/// These indicate a desynchronized broker/strategy pair; the event is
/// dropped and state is left untouched.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Fill referenced an order the trade engine does not know
    #[error("fill for unknown order {0}")]
    FillForUnknownOrder(OrderId),

    /// Confirmation referenced an order the trade engine does not know
    #[error("confirmation for unknown order {0}")]
    ConfirmForUnknownOrder(OrderId),

    /// Response referenced an order the trade engine does not know
    #[error("{kind} response for unknown order {order_id}")]
    ResponseForUnknownOrder { kind: String, order_id: OrderId },

    /// A request never reached the broker
    #[error("request not delivered for order {order_id}: {reason}")]
    RequestNotDelivered { order_id: OrderId, reason: String },

    /// Duplicate in-flight request for the same order
    #[error("request already awaiting response for order {0}")]
    DuplicateRequest(OrderId),
}

/// Broken invariants that abort the run.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum FatalError {
    /// Simulated time moved backwards in the merged stream
    #[error("time regression in merged stream for {symbol}: {got} after {prev}")]
    TimeRegression {
        symbol: String,
        prev: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    /// The order state machine reached an impossible configuration
    #[error("order state corrupted for {order_id}: {reason}")]
    CorruptedOrderState { order_id: OrderId, reason: String },

    /// A pipeline channel closed while the run was still in progress
    #[error("pipeline channel closed unexpectedly: {0}")]
    PipelineBroken(String),
}

/// Top-level engine error.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl EngineError {
    /// Whether this error must terminate the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
