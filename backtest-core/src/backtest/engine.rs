//! Engine task wiring and run orchestration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::report::{BacktestReport, SymbolReport};
use crate::config::{BacktestConfig, DataMode};
use crate::data::MarketDataProducer;
use crate::error::{EngineError, EngineResult, FatalError};
use crate::events::{Event, EventPayload};
use crate::execution::SimulatedBroker;
use crate::instruments::Instrument;
use crate::portfolio::{PortfolioAggregator, PositionEvent};
use crate::strategy::{Strategy, StrategyRuntime};

/// Event-driven backtest engine.
///
/// Configure, attach one strategy per symbol, then [`run`](Self::run) with a
/// market-data producer.
pub struct BacktestEngine {
    config: BacktestConfig,
    strategies: HashMap<String, Box<dyn Strategy>>,
    instruments: HashMap<String, Instrument>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            strategies: HashMap::new(),
            instruments: HashMap::new(),
        }
    }

    /// Attach the strategy driving `symbol`.
    pub fn add_strategy(&mut self, symbol: impl Into<String>, strategy: Box<dyn Strategy>) {
        self.strategies.insert(symbol.into(), strategy);
    }

    /// Override the instrument definition for one symbol; symbols without an
    /// explicit instrument use the config's default schedule.
    pub fn add_instrument(&mut self, instrument: Instrument) {
        self.instruments
            .insert(instrument.symbol.clone(), instrument);
    }

    /// Run the backtest to completion.
    ///
    /// Spawns the producer, the router, one broker task and one strategy
    /// task per instrument, and the portfolio aggregator; joins them all
    /// after `EndOfData` cascades through and assembles the report.
    pub async fn run<P>(mut self, mut producer: P) -> EngineResult<BacktestReport>
    where
        P: MarketDataProducer + 'static,
    {
        self.config.validate().map_err(EngineError::Config)?;

        let capacity = self.config.channel_capacity;
        let (events_tx, events_rx) = mpsc::channel::<Event>(capacity);
        let (errors_tx, mut errors_rx) = mpsc::channel::<EngineError>(capacity);
        let (portfolio_tx, portfolio_rx) = mpsc::channel::<PositionEvent>(capacity);

        producer.connect(events_tx, errors_tx.clone())?;
        let producer_handle: JoinHandle<EngineResult<()>> =
            tokio::spawn(async move { producer.run().await });

        let mut market_txs: HashMap<String, mpsc::Sender<Event>> = HashMap::new();
        let mut broker_handles = Vec::new();
        let mut strategy_handles = Vec::new();

        for symbol in self.config.symbols.clone() {
            let strategy = self.strategies.remove(&symbol).ok_or_else(|| {
                EngineError::Config(format!("no strategy attached for symbol {symbol}"))
            })?;
            let instrument = self
                .instruments
                .remove(&symbol)
                .unwrap_or_else(|| Instrument::new(&symbol, self.config.schedule.clone()));

            let (market_tx, market_rx) = mpsc::channel::<Event>(capacity);
            // One batch in flight at a time: the broker waits for the
            // strategy's reply before the next market-data event.
            let (batch_tx, batch_rx) = mpsc::channel::<Vec<Event>>(1);
            let (reply_tx, reply_rx) = mpsc::channel::<Vec<Event>>(1);

            let broker =
                SimulatedBroker::new(instrument, self.config.latency, self.config.strict_limit);
            let runtime =
                StrategyRuntime::new(&symbol, self.config.n_periods, strategy).with_journal();

            broker_handles.push(tokio::spawn(broker_task(
                broker,
                market_rx,
                batch_tx,
                reply_rx,
                errors_tx.clone(),
            )));
            strategy_handles.push((
                symbol.clone(),
                tokio::spawn(strategy_task(
                    runtime,
                    batch_rx,
                    reply_tx,
                    portfolio_tx.clone(),
                    errors_tx.clone(),
                )),
            ));
            market_txs.insert(symbol, market_tx);
        }

        // Tasks hold their own clones; dropping ours lets channels close
        // once the pipeline drains.
        drop(portfolio_tx);
        drop(errors_tx);

        let router_handle = tokio::spawn(router_task(events_rx, market_txs, self.config.mode));
        let portfolio_handle = tokio::spawn(PortfolioAggregator::new().run(portfolio_rx));

        // Collect surfaced errors while the pipeline runs.
        let mut errors: Vec<EngineError> = Vec::new();
        let collector = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(err) = errors_rx.recv().await {
                if err.is_fatal() {
                    error!(%err, "fatal pipeline error");
                } else {
                    debug!(%err, "engine error");
                }
                collected.push(err);
            }
            collected
        });

        if let Err(err) = flatten_join(producer_handle).await {
            errors.push(err);
        }
        let router_result = router_handle
            .await
            .map_err(|e| FatalError::PipelineBroken(format!("router task panicked: {e}")))?;

        for handle in broker_handles {
            if let Err(e) = handle.await {
                errors.push(
                    FatalError::PipelineBroken(format!("broker task panicked: {e}")).into(),
                );
            }
        }

        let mut symbols = HashMap::new();
        for (symbol, handle) in strategy_handles {
            let mut runtime = handle
                .await
                .map_err(|e| FatalError::PipelineBroken(format!("strategy task panicked: {e}")))?;
            let events = runtime.take_journal();
            let ctx = runtime.into_context();
            let report = SymbolReport {
                symbol: symbol.clone(),
                realized_pnl: ctx.realized_pnl(),
                unrealized_pnl: ctx.unrealized_pnl(),
                pending_requests: ctx.pending_request_count(),
                closed_trades: ctx.closed_trades().to_vec(),
                final_trade: ctx.current_trade().clone(),
                events,
            };
            symbols.insert(symbol, report);
        }

        let portfolio = portfolio_handle
            .await
            .map_err(|e| FatalError::PipelineBroken(format!("portfolio task panicked: {e}")))?;
        errors.extend(collector.await.unwrap_or_default());

        router_result?;
        if let Some(fatal) = errors.iter().find(|e| e.is_fatal()) {
            return Err(fatal.clone());
        }

        info!(symbols = symbols.len(), "backtest finished");
        Ok(BacktestReport {
            symbols,
            portfolio,
            errors,
        })
    }
}

async fn flatten_join(handle: JoinHandle<EngineResult<()>>) -> EngineResult<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(FatalError::PipelineBroken(format!("producer task panicked: {e}")).into()),
    }
}

/// Distributes the global chronological stream per symbol and enforces the
/// fatal monotonic-time invariant on the merged input. Market data of the
/// wrong granularity for the configured mode is dropped.
async fn router_task(
    mut events_rx: mpsc::Receiver<Event>,
    market_txs: HashMap<String, mpsc::Sender<Event>>,
    mode: DataMode,
) -> EngineResult<()> {
    let mut last_ts: Option<DateTime<Utc>> = None;
    let mut eod_seen: HashMap<&str, bool> =
        market_txs.keys().map(|s| (s.as_str(), false)).collect();

    while let Some(event) = events_rx.recv().await {
        if let Some(prev) = last_ts {
            if event.ts < prev {
                let fatal = FatalError::TimeRegression {
                    symbol: event.symbol.clone(),
                    prev,
                    got: event.ts,
                };
                // Shut the pipeline down before reporting.
                for (symbol, tx) in &market_txs {
                    let _ = tx.send(Event::end_of_data(symbol.clone(), prev)).await;
                }
                return Err(fatal.into());
            }
        }
        last_ts = Some(event.ts);

        let Some(tx) = market_txs.get(&event.symbol) else {
            warn!(symbol = %event.symbol, "event for unconfigured symbol dropped");
            continue;
        };
        let mismatched = match (&event.payload, mode) {
            (EventPayload::TickArrived(_), DataMode::Candles) => true,
            (
                EventPayload::CandleOpen { .. } | EventPayload::CandleClose(_),
                DataMode::Ticks,
            ) => true,
            _ => false,
        };
        if mismatched {
            warn!(
                symbol = %event.symbol,
                payload = event.payload.name(),
                "market data does not match configured mode, dropped"
            );
            continue;
        }
        if matches!(event.payload, EventPayload::EndOfData) {
            if let Some(seen) = eod_seen.get_mut(event.symbol.as_str()) {
                *seen = true;
            }
        }
        if tx.send(event).await.is_err() {
            break;
        }
    }

    // Producer closed without per-symbol terminators: synthesize them so
    // shutdown still cascades.
    let final_ts = last_ts.unwrap_or(DateTime::UNIX_EPOCH);
    for (symbol, tx) in &market_txs {
        if !eod_seen.get(symbol.as_str()).copied().unwrap_or(true) {
            let _ = tx.send(Event::end_of_data(symbol.clone(), final_ts)).await;
        }
    }
    Ok(())
}

/// Per-instrument broker worker.
///
/// For each market-data event: feed the broker, surface errors, deliver the
/// ordered batch, then block on the strategy's reply batch of requests. The
/// alternating send/receive serializes the instrument pipeline.
async fn broker_task(
    mut broker: SimulatedBroker,
    mut market_rx: mpsc::Receiver<Event>,
    batch_tx: mpsc::Sender<Vec<Event>>,
    mut reply_rx: mpsc::Receiver<Vec<Event>>,
    errors_tx: mpsc::Sender<EngineError>,
) {
    while let Some(event) = market_rx.recv().await {
        let at_end = matches!(event.payload, EventPayload::EndOfData);
        let output = broker.on_market_event(&event);
        for err in output.errors {
            let _ = errors_tx.send(err).await;
        }

        // A dropped (broken) event produces nothing to deliver.
        if output.events.is_empty() {
            if at_end {
                break;
            }
            continue;
        }

        if batch_tx.send(output.events).await.is_err() {
            break;
        }
        match reply_rx.recv().await {
            Some(requests) => {
                for request in requests {
                    broker.submit_request(request);
                }
            }
            None => break,
        }

        if at_end {
            break;
        }
    }
    debug!(symbol = broker.symbol(), "broker task finished");
}

/// Per-instrument strategy worker: applies each delivered batch in order and
/// replies with the requests user code issued.
///
/// Timestamps need no re-check here: the router rejects regressions on the
/// merged stream before fan-out, and the broker's release discipline only
/// ever appends events at or after everything it released earlier.
async fn strategy_task(
    mut runtime: StrategyRuntime,
    mut batch_rx: mpsc::Receiver<Vec<Event>>,
    reply_tx: mpsc::Sender<Vec<Event>>,
    portfolio_tx: mpsc::Sender<PositionEvent>,
    errors_tx: mpsc::Sender<EngineError>,
) -> StrategyRuntime {
    while let Some(batch) = batch_rx.recv().await {
        let mut requests = Vec::new();
        for event in &batch {
            let output = runtime.handle_event(event);
            for position_event in output.position_events {
                let _ = portfolio_tx.send(position_event).await;
            }
            for err in output.errors {
                let _ = errors_tx.send(err).await;
            }
            requests.extend(output.requests);
        }
        if reply_tx.send(requests).await.is_err() {
            break;
        }
    }
    runtime
}
