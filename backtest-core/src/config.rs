//! Engine configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::DateRange;
use crate::execution::LatencyModel;
use crate::instruments::ExchangeSchedule;

/// Which market-data granularity drives matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataMode {
    /// Tick replay: trades and/or quotes
    #[default]
    Ticks,
    /// Candle replay: open and close price points per bar
    Candles,
}

/// Configuration for one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Instruments to trade
    pub symbols: Vec<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub mode: DataMode,
    /// Broker wire model
    pub latency: LatencyModel,
    /// Exact price equality does not fill limit orders when set
    pub strict_limit: bool,
    /// Rolling window length; user callbacks fire once a window is warm
    pub n_periods: usize,
    /// Default exchange schedule for instruments without an explicit one
    pub schedule: ExchangeSchedule,
    /// Bound for the pipeline channels
    pub channel_capacity: usize,
}

impl BacktestConfig {
    pub fn new(symbols: Vec<String>, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            symbols,
            from,
            to,
            mode: DataMode::default(),
            latency: LatencyModel::default(),
            strict_limit: false,
            n_periods: 1,
            schedule: ExchangeSchedule::us_equities(),
            channel_capacity: 1024,
        }
    }

    pub fn with_mode(mut self, mode: DataMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_latency(mut self, latency: LatencyModel) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_strict_limit(mut self, strict: bool) -> Self {
        self.strict_limit = strict;
        self
    }

    pub fn with_n_periods(mut self, n: usize) -> Self {
        self.n_periods = n.max(1);
        self
    }

    pub fn with_schedule(mut self, schedule: ExchangeSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.from, self.to)
    }

    /// Basic sanity checks before a run starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("no symbols configured".to_string());
        }
        if self.from > self.to {
            return Err(format!("from-date {} after to-date {}", self.from, self.to));
        }
        Ok(())
    }
}
