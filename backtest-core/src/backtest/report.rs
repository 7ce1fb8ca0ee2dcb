//! Run reports: the performance ledger returned by the engine.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::events::Event;
use crate::portfolio::PortfolioSummary;
use crate::trades::Trade;

/// Final state of one instrument's strategy runtime.
#[derive(Debug)]
pub struct SymbolReport {
    pub symbol: String,
    /// Completed position arcs, in close order
    pub closed_trades: Vec<Trade>,
    /// The trade that was current when the run ended
    pub final_trade: Trade,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Every event the runtime observed, in delivery order
    pub events: Vec<Event>,
    /// Requests still awaiting a broker response at shutdown
    pub pending_requests: usize,
}

impl SymbolReport {
    /// Signed final position.
    pub fn position(&self) -> i64 {
        self.final_trade.position()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Whether the delivered event stream was non-decreasing in time.
    pub fn events_are_chronological(&self) -> bool {
        self.events.windows(2).all(|pair| pair[0].ts <= pair[1].ts)
    }
}

/// Result of a full run: per-symbol ledgers, the portfolio rollup, and the
/// non-fatal errors surfaced along the way.
#[derive(Debug)]
pub struct BacktestReport {
    pub symbols: HashMap<String, SymbolReport>,
    pub portfolio: PortfolioSummary,
    pub errors: Vec<EngineError>,
}

impl BacktestReport {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolReport> {
        self.symbols.get(symbol)
    }

    /// Realized P&L summed over all symbols' closed trades.
    pub fn total_realized_pnl(&self) -> Decimal {
        self.symbols.values().map(|s| s.realized_pnl).sum()
    }
}
