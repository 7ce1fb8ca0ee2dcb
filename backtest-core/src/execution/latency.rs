//! Broker latency model.
//!
//! Two constants govern the simulated wire:
//!
//! - `single_trip` — delay between a strategy request and the moment the
//!   broker can observe it. Before that instant the request is in flight and
//!   cannot match (the dead zone).
//! - `round_trip` — delay between a strategy request and the timestamp of
//!   the broker's response back at the strategy.
//!
//! `single_trip <= round_trip` always holds.

use chrono::{DateTime, Duration, Utc};

/// Latency constants for the simulated broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyModel {
    single_trip: Duration,
    round_trip: Duration,
}

impl LatencyModel {
    /// Create a latency model. `single_trip` is clamped to `round_trip`.
    pub fn new(single_trip: Duration, round_trip: Duration) -> Self {
        Self {
            single_trip: single_trip.min(round_trip),
            round_trip,
        }
    }

    /// Convenience constructor from milliseconds.
    pub fn from_millis(single_trip_ms: i64, round_trip_ms: i64) -> Self {
        Self::new(
            Duration::milliseconds(single_trip_ms),
            Duration::milliseconds(round_trip_ms),
        )
    }

    /// Symmetric wire: requests become visible halfway through the round trip.
    pub fn symmetric(round_trip: Duration) -> Self {
        Self::new(round_trip / 2, round_trip)
    }

    /// Zero latency: requests are visible and answered instantly.
    pub fn zero() -> Self {
        Self::new(Duration::zero(), Duration::zero())
    }

    pub fn single_trip(&self) -> Duration {
        self.single_trip
    }

    pub fn round_trip(&self) -> Duration {
        self.round_trip
    }

    /// Instant at which a request submitted at `submitted` becomes visible
    /// inside the broker.
    pub fn visibility(&self, submitted: DateTime<Utc>) -> DateTime<Utc> {
        submitted + self.single_trip
    }

    /// Timestamp carried by the response to a request submitted at
    /// `submitted`.
    pub fn response_ts(&self, submitted: DateTime<Utc>) -> DateTime<Utc> {
        submitted + self.round_trip
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self::zero()
    }
}
