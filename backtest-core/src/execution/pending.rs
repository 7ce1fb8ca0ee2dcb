//! Pending-event buffer: timestamp-ordered release of broker events.
//!
//! Broker-generated events (confirmations, fills, cancels) carry timestamps
//! offset by modelled latency and may lie in the simulated future. They wait
//! here until market-data time catches up: on a market-data event at `T` the
//! broker releases everything stamped `<= T` ahead of the market-data event
//! itself, preserving the non-decreasing timestamp guarantee downstream.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::events::Event;

#[derive(Debug, Clone)]
struct PendingEvent {
    event: Event,
    /// Generation order; equal-timestamp events release in this order
    sequence: u64,
}

impl PartialEq for PendingEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.ts == other.event.ts && self.sequence == other.sequence
    }
}

impl Eq for PendingEvent {}

impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEvent {
    // Reversed for min-heap behavior on (timestamp, sequence).
    fn cmp(&self, other: &Self) -> Ordering {
        match other.event.ts.cmp(&self.event.ts) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Broker-side buffer of generated events awaiting release.
#[derive(Debug, Default)]
pub struct PendingEvents {
    heap: BinaryHeap<PendingEvent>,
    sequence: u64,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            sequence: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        let pending = PendingEvent {
            event,
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.heap.push(pending);
    }

    /// Release every buffered event with timestamp `<= now`, in timestamp
    /// order (generation order on ties).
    pub fn release_until(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut released = Vec::new();
        while let Some(pending) = self.heap.peek() {
            if pending.event.ts <= now {
                released.push(self.heap.pop().expect("peeked").event);
            } else {
                break;
            }
        }
        released
    }

    /// Release everything, regardless of timestamp. Used at EndOfData.
    pub fn drain_all(&mut self) -> Vec<Event> {
        let mut released = Vec::new();
        while let Some(pending) = self.heap.pop() {
            released.push(pending.event);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
