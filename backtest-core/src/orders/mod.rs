//! Order model: types, lifecycle state machine and validated construction.
//!
//! Orders follow a strict state machine:
//!
//! ```text
//! New ──► Confirmed ──► PartialFilled ──► Filled
//!  │          │               │
//!  ▼          ▼               ▼
//! Rejected  Canceled       Canceled
//! ```
//!
//! `Rejected` is reachable only from `New`. `Filled`, `Canceled` and
//! `Rejected` are terminal.

mod order;
mod types;

pub use order::{Order, OrderBuilder, OrderError};
pub use types::{OrderId, OrderSide, OrderStatus, OrderType, TimeInForce};
