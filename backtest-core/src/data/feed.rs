//! External data interfaces: the market-data producer, historical storage
//! and the prepared-dataset identity hash.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::info;

use super::types::{Candle, DateRange, Tick, Timeframe};
use crate::error::{EngineError, EngineResult, FatalError};
use crate::events::Event;

/// Source of the chronological market-data stream.
///
/// `connect` hands over the event and error channels; `run` replays events
/// in non-decreasing timestamp order and closes the event channel when
/// finished. Every instrument's stream ends with an `EndOfData` event.
#[async_trait]
pub trait MarketDataProducer: Send {
    fn connect(
        &mut self,
        events: mpsc::Sender<Event>,
        errors: mpsc::Sender<EngineError>,
    ) -> EngineResult<()>;

    async fn run(&mut self) -> EngineResult<()>;
}

/// Read access to persisted history.
///
/// Results are ordered by datetime ascending; missing data yields an empty
/// vector, not an error.
#[async_trait]
pub trait HistoricalStorage: Send + Sync {
    async fn ticks(
        &self,
        symbol: &str,
        range: DateRange,
        want_quotes: bool,
        want_trades: bool,
    ) -> EngineResult<Vec<Tick>>;

    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> EngineResult<Vec<Candle>>;
}

/// In-memory replayer over a pre-built event list.
///
/// Sorts stably on construction, replays through the connected channel and
/// appends an `EndOfData` marker per symbol at the final timestamp.
#[derive(Debug)]
pub struct ReplayFeed {
    events: Vec<Event>,
    channels: Option<(mpsc::Sender<Event>, mpsc::Sender<EngineError>)>,
}

impl ReplayFeed {
    pub fn new(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.ts);
        Self {
            events,
            channels: None,
        }
    }

    /// Replay a set of ticks (already carrying their symbols).
    pub fn from_ticks(ticks: Vec<Tick>) -> Self {
        Self::new(ticks.into_iter().map(Event::tick).collect())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl MarketDataProducer for ReplayFeed {
    fn connect(
        &mut self,
        events: mpsc::Sender<Event>,
        errors: mpsc::Sender<EngineError>,
    ) -> EngineResult<()> {
        self.channels = Some((events, errors));
        Ok(())
    }

    async fn run(&mut self) -> EngineResult<()> {
        let (events_tx, _errors_tx) = self
            .channels
            .take()
            .ok_or_else(|| FatalError::PipelineBroken("replay feed not connected".to_string()))?;

        let events = std::mem::take(&mut self.events);
        info!(count = events.len(), "replay started");

        let end_ts = events.last().map(|e| e.ts);
        let mut symbols: Vec<String> = Vec::new();
        for event in events {
            if !symbols.contains(&event.symbol) {
                symbols.push(event.symbol.clone());
            }
            events_tx
                .send(event)
                .await
                .map_err(|_| FatalError::PipelineBroken("event channel closed".to_string()))?;
        }

        if let Some(end_ts) = end_ts {
            for symbol in symbols {
                events_tx
                    .send(Event::end_of_data(symbol, end_ts))
                    .await
                    .map_err(|_| {
                        FatalError::PipelineBroken("event channel closed".to_string())
                    })?;
            }
        }

        info!("replay finished");
        Ok(())
    }
}

/// Identity of a prepared dataset: a digest over the symbol set and date
/// range that is independent of symbol order.
pub fn prepared_data_id(symbols: &[String], range: &DateRange) -> String {
    let mut sorted: Vec<&str> = symbols.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for symbol in sorted {
        hasher.update(symbol.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(range.from.to_string().as_bytes());
    hasher.update(range.to.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
