//! Arrival queue for latency-delayed requests.
//!
//! Requests sit here between submission and broker visibility. The queue is
//! a min-heap on visibility time; Rust's `BinaryHeap` is a max-heap, so the
//! ordering is reversed, with a sequence number breaking ties FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::events::Event;

/// A request in flight towards the broker.
#[derive(Debug, Clone)]
pub struct InflightRequest {
    /// The request event (NewOrderRequest / CancelRequest / ReplaceRequest);
    /// its `ts` is the submission time.
    pub event: Event,
    /// When the broker can first observe the request
    pub visible_at: DateTime<Utc>,
    /// FIFO tie-break for equal visibility instants
    sequence: u64,
}

impl PartialEq for InflightRequest {
    fn eq(&self, other: &Self) -> bool {
        self.visible_at == other.visible_at && self.sequence == other.sequence
    }
}

impl Eq for InflightRequest {}

impl PartialOrd for InflightRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InflightRequest {
    // Reversed so the max-heap pops the earliest visibility first.
    fn cmp(&self, other: &Self) -> Ordering {
        match other.visible_at.cmp(&self.visible_at) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Priority queue of in-flight requests ordered by visibility time.
#[derive(Debug, Default)]
pub struct RequestQueue {
    queue: BinaryHeap<InflightRequest>,
    sequence: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            sequence: 0,
        }
    }

    /// Queue a request that becomes visible at `visible_at`.
    pub fn push(&mut self, event: Event, visible_at: DateTime<Utc>) {
        let request = InflightRequest {
            event,
            visible_at,
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.queue.push(request);
    }

    /// Pop every request visible by `now`, in submission-time order.
    pub fn pop_visible(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut ready = Vec::new();
        while let Some(request) = self.queue.peek() {
            if request.visible_at <= now {
                ready.push(self.queue.pop().expect("peeked"));
            } else {
                break;
            }
        }
        // Requests process in the order the strategy issued them.
        ready.sort_by(|a, b| {
            a.event
                .ts
                .cmp(&b.event.ts)
                .then(a.sequence.cmp(&b.sequence))
        });
        ready.into_iter().map(|r| r.event).collect()
    }

    /// Earliest visibility instant still queued.
    pub fn next_visible_at(&self) -> Option<DateTime<Utc>> {
        self.queue.peek().map(|r| r.visible_at)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
