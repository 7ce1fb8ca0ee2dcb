//! Position-change events and the portfolio aggregator.
//!
//! The strategy runtime emits a [`PositionEvent`] whenever a Flat trade
//! turns Long/Short and whenever a Closed trade is replaced by a new open
//! trade. The [`PortfolioAggregator`] consumes them on a bounded channel and
//! keeps per-symbol tallies; it is read-only from the core's perspective.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::trades::TradeKind;

/// Event generated when an instrument's position arc changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    /// Direction of the newly current trade
    pub kind: TradeKind,
    /// Unsigned quantity of the newly current trade
    pub qty: u64,
    /// Average open price of the newly current trade
    pub avg_open_price: Decimal,
    /// Realized P&L accumulated on the arc that just closed (zero when a
    /// position opens from flat)
    pub closed_realized_pnl: Decimal,
}

impl PositionEvent {
    /// Signed position carried by this event.
    pub fn position(&self) -> i64 {
        self.kind.sign() * self.qty as i64
    }
}

/// Per-symbol rollup maintained by the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolExposure {
    pub position: i64,
    pub realized_pnl: Decimal,
    pub position_changes: u64,
}

/// Aggregate of all position-change events seen during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub exposures: HashMap<String, SymbolExposure>,
    pub total_realized_pnl: Decimal,
}

impl PortfolioSummary {
    pub fn position(&self, symbol: &str) -> i64 {
        self.exposures.get(symbol).map_or(0, |e| e.position)
    }
}

/// Consumes position-change events until the channel closes.
#[derive(Debug, Default)]
pub struct PortfolioAggregator {
    summary: PortfolioSummary,
}

impl PortfolioAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event to the rollup.
    pub fn apply(&mut self, event: &PositionEvent) {
        let exposure = self.summary.exposures.entry(event.symbol.clone()).or_default();
        exposure.position = event.position();
        exposure.realized_pnl += event.closed_realized_pnl;
        exposure.position_changes += 1;
        self.summary.total_realized_pnl += event.closed_realized_pnl;
        debug!(
            symbol = %event.symbol,
            position = event.position(),
            "position change"
        );
    }

    /// Drain the channel to completion and return the final summary.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PositionEvent>) -> PortfolioSummary {
        while let Some(event) = rx.recv().await {
            self.apply(&event);
        }
        self.summary
    }

    pub fn summary(&self) -> &PortfolioSummary {
        &self.summary
    }
}
