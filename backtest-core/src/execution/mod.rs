//! Simulated broker: latency modeling, request intake, matching and the
//! pending-event release discipline.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      SimulatedBroker                           │
//! │                                                                │
//! │  submit_request() ──► RequestQueue (visible at t+single_trip)  │
//! │                             │                                  │
//! │        market data at T ────┤ drain visibility <= T            │
//! │                             ▼                                  │
//! │                   intake / cancel / replace                    │
//! │                             │                                  │
//! │                       matching rules ──► fills                 │
//! │                             │                                  │
//! │                       PendingEvents (by timestamp)             │
//! │                             │ release <= T                     │
//! │                             ▼                                  │
//! │            ordered event batch ──► strategy runtime            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request submitted at `t` is invisible to matching until market time
//! reaches `t + single_trip`; its response carries timestamp
//! `t + round_trip`. Fills generated by market data at `T` carry
//! `T + round_trip`. Time-in-force cancels carry the expiry instant itself.

mod broker;
mod inflight;
mod latency;
mod matching;
mod pending;

pub use broker::{BrokerOutput, SimulatedBroker};
pub use inflight::{InflightRequest, RequestQueue};
pub use latency::LatencyModel;
pub use matching::{match_candle_close, match_candle_open, match_tick, MatchOutcome};
pub use pending::PendingEvents;
