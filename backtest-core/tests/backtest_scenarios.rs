//! End-to-end scenarios driving the full pipeline: replay feed, router,
//! simulated broker, strategy runtime and portfolio aggregator.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use backtest_core::backtest::{BacktestEngine, BacktestReport};
use backtest_core::config::{BacktestConfig, DataMode};
use backtest_core::data::{Candle, MarketDataProducer, ReplayFeed, Tick, Timeframe};
use backtest_core::error::{EngineError, EngineResult, FatalError};
use backtest_core::events::{Event, EventPayload};
use backtest_core::execution::LatencyModel;
use backtest_core::instruments::ExchangeSchedule;
use backtest_core::orders::{OrderId, OrderSide, TimeInForce};
use backtest_core::strategy::{Strategy, StrategyContext};
use backtest_core::trades::TradeKind;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
}

fn ms(v: i64) -> Duration {
    Duration::milliseconds(v)
}

fn utc_schedule() -> ExchangeSchedule {
    ExchangeSchedule::new(
        chrono_tz::UTC,
        NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
    )
}

fn base_config(symbols: &[&str]) -> BacktestConfig {
    BacktestConfig::new(
        symbols.iter().map(|s| s.to_string()).collect(),
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
    )
    .with_schedule(utc_schedule())
    .with_n_periods(1)
}

fn trade_tick(symbol: &str, at: DateTime<Utc>, last: Decimal, size: u64) -> Event {
    Event::tick(Tick::trade(symbol, at, last, size))
}

async fn run_single(
    config: BacktestConfig,
    symbol: &str,
    strategy: Box<dyn Strategy>,
    events: Vec<Event>,
) -> BacktestReport {
    let mut engine = BacktestEngine::new(config);
    engine.add_strategy(symbol, strategy);
    engine.run(ReplayFeed::new(events)).await.expect("run")
}

fn find_payload<'a>(
    report: &'a BacktestReport,
    symbol: &str,
    pred: impl Fn(&EventPayload) -> bool,
) -> Option<&'a Event> {
    report
        .symbol(symbol)
        .unwrap()
        .events
        .iter()
        .find(|e| pred(&e.payload))
}

/// Submits one limit order on the first tick callback.
struct LimitOnce {
    side: OrderSide,
    qty: u64,
    price: Decimal,
    tif: TimeInForce,
    submitted: bool,
}

impl LimitOnce {
    fn buy(qty: u64, price: Decimal) -> Box<Self> {
        Box::new(Self {
            side: OrderSide::Buy,
            qty,
            price,
            tif: TimeInForce::GTC,
            submitted: false,
        })
    }

    fn buy_day(qty: u64, price: Decimal) -> Box<Self> {
        Box::new(Self {
            side: OrderSide::Buy,
            qty,
            price,
            tif: TimeInForce::Day,
            submitted: false,
        })
    }
}

impl Strategy for LimitOnce {
    fn on_tick(&mut self, ctx: &mut StrategyContext, _tick: &Tick) {
        if !self.submitted {
            self.submitted = true;
            ctx.submit_limit_order(self.side, self.qty, self.price, self.tif)
                .expect("submit");
        }
    }
}

#[tokio::test]
async fn scenario_basic_limit_fill() {
    let round_trip = ms(250);
    let config = base_config(&["AAPL"]).with_latency(LatencyModel::from_millis(125, 250));

    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(99), 20),
    ];

    let report = run_single(config, "AAPL", LimitOnce::buy(10, dec!(100)), events).await;
    let symbol = report.symbol("AAPL").unwrap();

    // Confirmation exactly one round trip after submission.
    let confirmed = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderConfirmed { .. })
    })
    .expect("confirmation delivered");
    assert_eq!(confirmed.ts, t0() + round_trip);

    // Fill at the limit price, stamped tick time + round trip.
    let filled = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderFilled { .. })
    })
    .expect("fill delivered");
    match &filled.payload {
        EventPayload::OrderFilled { price, qty, .. } => {
            assert_eq!(*price, dec!(100));
            assert_eq!(*qty, 10);
        }
        _ => unreachable!(),
    }
    assert_eq!(filled.ts, t0() + ms(1000) + round_trip);

    assert_eq!(symbol.position(), 10);
    assert_eq!(symbol.realized_pnl, Decimal::ZERO);
    assert_eq!(symbol.pending_requests, 0);
    assert!(symbol.events_are_chronological());
}

/// Cancels the working order once a partial fill shows up.
struct PartialThenCancel {
    order_id: Option<OrderId>,
    cancel_sent: bool,
}

impl Strategy for PartialThenCancel {
    fn on_tick(&mut self, ctx: &mut StrategyContext, _tick: &Tick) {
        match &self.order_id {
            None => {
                let id = ctx
                    .submit_limit_order(OrderSide::Buy, 10, dec!(100), TimeInForce::GTC)
                    .expect("submit");
                self.order_id = Some(id);
            }
            Some(id) => {
                if !self.cancel_sent && ctx.position() == 3 && ctx.is_order_confirmed(id) {
                    self.cancel_sent = true;
                    ctx.cancel_order(id).expect("cancel");
                }
            }
        }
    }
}

#[tokio::test]
async fn scenario_partial_fill_then_cancel() {
    let config = base_config(&["AAPL"]);
    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(99), 3),
        trade_tick("AAPL", t0() + ms(2000), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(3000), dec!(101), 20),
    ];

    let strategy = Box::new(PartialThenCancel {
        order_id: None,
        cancel_sent: false,
    });
    let report = run_single(config, "AAPL", strategy, events).await;
    let symbol = report.symbol("AAPL").unwrap();

    let filled = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderFilled { .. })
    })
    .expect("partial fill delivered");
    match &filled.payload {
        EventPayload::OrderFilled { qty, .. } => assert_eq!(*qty, 3),
        _ => unreachable!(),
    }

    assert!(find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderCanceled { .. })
    })
    .is_some());

    assert_eq!(symbol.position(), 3);
    // The order reached a terminal state on the strategy side.
    assert!(symbol.final_trade.confirmed_orders.is_empty());
    assert_eq!(symbol.final_trade.terminal_orders.len(), 1);
    assert_eq!(symbol.pending_requests, 0);
    assert!(symbol.events_are_chronological());
}

#[tokio::test]
async fn scenario_strict_limit_no_fill_at_equal_price() {
    let config = base_config(&["AAPL"]).with_strict_limit(true);
    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(100), 20),
        trade_tick("AAPL", t0() + ms(2000), dec!(100), 20),
    ];

    let report = run_single(config, "AAPL", LimitOnce::buy(10, dec!(100)), events).await;
    let symbol = report.symbol("AAPL").unwrap();

    assert!(find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderFilled { .. })
    })
    .is_none());
    assert_eq!(symbol.position(), 0);
    // The order is still working when the run ends.
    assert_eq!(symbol.final_trade.confirmed_orders.len(), 1);
}

#[tokio::test]
async fn scenario_day_tif_expires_at_midnight() {
    let config = base_config(&["AAPL"]);
    let next_morning = Utc.with_ymd_and_hms(2024, 1, 16, 9, 30, 0).unwrap();
    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        trade_tick("AAPL", next_morning, dec!(101), 20),
    ];

    let report = run_single(config, "AAPL", LimitOnce::buy_day(10, dec!(100)), events).await;
    let symbol = report.symbol("AAPL").unwrap();

    let canceled = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderCanceled { .. })
    })
    .expect("expiry cancel delivered");
    assert_eq!(
        canceled.ts,
        Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap()
    );

    assert_eq!(symbol.position(), 0);
    assert!(symbol.final_trade.confirmed_orders.is_empty());
    assert!(symbol.events_are_chronological());
}

/// Opens long 5, then reverses with a sell of 10.
struct ReverseAfterLong {
    stage: u8,
}

impl Strategy for ReverseAfterLong {
    fn on_tick(&mut self, ctx: &mut StrategyContext, _tick: &Tick) {
        match self.stage {
            0 => {
                self.stage = 1;
                ctx.submit_market_order(OrderSide::Buy, 5, TimeInForce::GTC)
                    .expect("buy");
            }
            1 if ctx.position() == 5 => {
                self.stage = 2;
                ctx.submit_market_order(OrderSide::Sell, 10, TimeInForce::GTC)
                    .expect("sell");
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn scenario_position_reversal_splits_trade() {
    let config = base_config(&["AAPL"]);
    let events = vec![
        trade_tick("AAPL", t0(), dec!(100), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(100), 20),
        trade_tick("AAPL", t0() + ms(2000), dec!(110), 20),
        trade_tick("AAPL", t0() + ms(3000), dec!(110), 20),
    ];

    let report = run_single(config, "AAPL", Box::new(ReverseAfterLong { stage: 0 }), events).await;
    let symbol = report.symbol("AAPL").unwrap();

    // First arc closed with 5 x (110 - 100) realized.
    assert_eq!(symbol.closed_trades.len(), 1);
    let closed = &symbol.closed_trades[0];
    assert_eq!(closed.kind, TradeKind::Closed);
    assert_eq!(closed.realized_pnl, dec!(50));

    // Residual opened the successor short at the fill price.
    assert_eq!(symbol.final_trade.kind, TradeKind::Short);
    assert_eq!(symbol.final_trade.qty, 5);
    assert_eq!(symbol.final_trade.avg_open_price, dec!(110));
    assert_eq!(symbol.position(), -5);

    // Portfolio saw the open and exactly one reversal change.
    assert_eq!(report.portfolio.position("AAPL"), -5);
    assert_eq!(report.portfolio.exposures["AAPL"].position_changes, 2);
    assert_eq!(report.portfolio.total_realized_pnl, dec!(50));
}

/// Replaces its order after the broker has already filled it, while the fill
/// response is still on the wire.
struct ReplaceWhileFillInFlight {
    order_id: Option<OrderId>,
    ticks_seen: usize,
    replace_sent: bool,
}

impl Strategy for ReplaceWhileFillInFlight {
    fn on_tick(&mut self, ctx: &mut StrategyContext, _tick: &Tick) {
        self.ticks_seen += 1;
        if self.ticks_seen == 1 {
            let id = ctx
                .submit_limit_order(OrderSide::Buy, 10, dec!(100), TimeInForce::GTC)
                .expect("submit");
            self.order_id = Some(id);
            return;
        }
        if self.ticks_seen == 3 && !self.replace_sent {
            if let Some(id) = &self.order_id {
                if ctx.is_order_confirmed(id) {
                    self.replace_sent = true;
                    ctx.replace_order(id, dec!(99)).expect("replace");
                }
            }
        }
    }
}

#[tokio::test]
async fn scenario_replace_rejected_after_fill() {
    let config = base_config(&["AAPL"]).with_latency(LatencyModel::from_millis(125, 250));
    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(99), 20),
        trade_tick("AAPL", t0() + ms(1100), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(1300), dec!(101), 20),
        trade_tick("AAPL", t0() + ms(1500), dec!(101), 20),
    ];

    let strategy = Box::new(ReplaceWhileFillInFlight {
        order_id: None,
        ticks_seen: 0,
        replace_sent: false,
    });
    let report = run_single(config, "AAPL", strategy, events).await;
    let symbol = report.symbol("AAPL").unwrap();

    let reject = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::ReplaceRejected { .. })
    })
    .expect("replace rejected");
    match &reject.payload {
        EventPayload::ReplaceRejected { reason, .. } => {
            assert_eq!(reason, "order is already filled");
        }
        _ => unreachable!(),
    }

    assert_eq!(symbol.position(), 10);
    assert_eq!(symbol.pending_requests, 0);
    assert!(symbol.events_are_chronological());
}

#[tokio::test]
async fn multi_symbol_streams_stay_isolated_and_ordered() {
    let config = base_config(&["AAPL", "MSFT"]);
    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        trade_tick("MSFT", t0() + ms(100), dec!(301), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(99), 20),
        trade_tick("MSFT", t0() + ms(1100), dec!(299), 20),
        trade_tick("AAPL", t0() + ms(2000), dec!(99), 20),
        trade_tick("MSFT", t0() + ms(2100), dec!(299), 20),
    ];

    let mut engine = BacktestEngine::new(config);
    engine.add_strategy("AAPL", LimitOnce::buy(10, dec!(100)));
    engine.add_strategy("MSFT", LimitOnce::buy(2, dec!(300)));
    let report = engine.run(ReplayFeed::new(events)).await.expect("run");

    let aapl = report.symbol("AAPL").unwrap();
    let msft = report.symbol("MSFT").unwrap();

    assert_eq!(aapl.position(), 10);
    assert_eq!(msft.position(), 2);
    assert!(aapl.events_are_chronological());
    assert!(msft.events_are_chronological());
    assert!(aapl.events.iter().all(|e| e.symbol == "AAPL"));
    assert!(msft.events.iter().all(|e| e.symbol == "MSFT"));

    assert_eq!(report.portfolio.position("AAPL"), 10);
    assert_eq!(report.portfolio.position("MSFT"), 2);
}

#[tokio::test]
async fn broken_tick_is_dropped_and_surfaced() {
    let config = base_config(&["AAPL"]);
    let events = vec![
        trade_tick("AAPL", t0(), dec!(101), 20),
        // Broken: zero price.
        trade_tick("AAPL", t0() + ms(500), dec!(0), 20),
        trade_tick("AAPL", t0() + ms(1000), dec!(99), 20),
    ];

    let report = run_single(config, "AAPL", LimitOnce::buy(10, dec!(100)), events).await;
    let symbol = report.symbol("AAPL").unwrap();

    // The run completed, the order filled on the valid tick, and the broken
    // tick never reached the strategy.
    assert_eq!(symbol.position(), 10);
    assert!(!report.errors.is_empty());
    assert!(symbol.events.iter().all(|e| match &e.payload {
        EventPayload::TickArrived(tick) => tick.validate().is_ok(),
        _ => true,
    }));
}

/// Submits a limit order on the first candle close.
struct LimitOnCandle {
    submitted: bool,
}

impl Strategy for LimitOnCandle {
    fn on_tick(&mut self, _ctx: &mut StrategyContext, _tick: &Tick) {}

    fn on_candle_close(&mut self, ctx: &mut StrategyContext, _candle: &Candle) {
        if !self.submitted {
            self.submitted = true;
            ctx.submit_limit_order(OrderSide::Buy, 10, dec!(100), TimeInForce::GTC)
                .expect("submit");
        }
    }
}

#[tokio::test]
async fn scenario_candle_mode_limit_fills_on_open() {
    let config = base_config(&["AAPL"]).with_mode(DataMode::Candles);

    let first = Candle::new(
        "AAPL",
        t0(),
        Timeframe::Minute,
        dec!(101),
        dec!(102),
        dec!(100.5),
        dec!(101),
        1000,
    );
    let events = vec![
        Event::candle_close(first),
        // Next bar gaps below the limit; the order fills at the open.
        Event::candle_open("AAPL", t0() + ms(60_000), dec!(99), Timeframe::Minute),
    ];

    let report = run_single(
        config,
        "AAPL",
        Box::new(LimitOnCandle { submitted: false }),
        events,
    )
    .await;
    let symbol = report.symbol("AAPL").unwrap();

    let filled = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderFilled { .. })
    })
    .expect("fill delivered");
    match &filled.payload {
        EventPayload::OrderFilled { price, qty, .. } => {
            assert_eq!(*price, dec!(99));
            assert_eq!(*qty, 10);
        }
        _ => unreachable!(),
    }

    assert_eq!(symbol.position(), 10);
    assert!(symbol.events_are_chronological());
}

#[tokio::test]
async fn candle_mode_drops_mismatched_ticks() {
    let config = base_config(&["AAPL"]).with_mode(DataMode::Candles);

    let first = Candle::new(
        "AAPL",
        t0(),
        Timeframe::Minute,
        dec!(101),
        dec!(102),
        dec!(100.5),
        dec!(101),
        1000,
    );
    let events = vec![
        Event::candle_close(first),
        // Wrong granularity for this run; the router must drop it.
        trade_tick("AAPL", t0() + ms(500), dec!(98), 20),
        Event::candle_open("AAPL", t0() + ms(60_000), dec!(99), Timeframe::Minute),
    ];

    let report = run_single(
        config,
        "AAPL",
        Box::new(LimitOnCandle { submitted: false }),
        events,
    )
    .await;
    let symbol = report.symbol("AAPL").unwrap();

    // The tick never reached the strategy runtime...
    assert!(symbol
        .events
        .iter()
        .all(|e| !matches!(e.payload, EventPayload::TickArrived(_))));

    // ...and never drove matching: the order fills at the candle open, not
    // at the dropped tick's limit-crossing price.
    let filled = find_payload(&report, "AAPL", |p| {
        matches!(p, EventPayload::OrderFilled { .. })
    })
    .expect("fill delivered");
    match &filled.payload {
        EventPayload::OrderFilled { price, qty, .. } => {
            assert_eq!(*price, dec!(99));
            assert_eq!(*qty, 10);
        }
        _ => unreachable!(),
    }
    assert_eq!(symbol.position(), 10);
}

/// Replays events verbatim - no sorting, no terminators. Drives the router's
/// invariant checks with streams `ReplayFeed` would have repaired.
struct RawFeed {
    events: Vec<Event>,
    channels: Option<(mpsc::Sender<Event>, mpsc::Sender<EngineError>)>,
}

impl RawFeed {
    fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            channels: None,
        }
    }
}

#[async_trait]
impl MarketDataProducer for RawFeed {
    fn connect(
        &mut self,
        events: mpsc::Sender<Event>,
        errors: mpsc::Sender<EngineError>,
    ) -> EngineResult<()> {
        self.channels = Some((events, errors));
        Ok(())
    }

    async fn run(&mut self) -> EngineResult<()> {
        let (events_tx, _errors_tx) = self.channels.take().expect("connected");
        for event in std::mem::take(&mut self.events) {
            // The engine closes the channel when it aborts the run; that is
            // not a producer failure here.
            if events_tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Never trades.
struct Idle;

impl Strategy for Idle {
    fn on_tick(&mut self, _ctx: &mut StrategyContext, _tick: &Tick) {}
}

#[tokio::test]
async fn time_regression_in_merged_stream_is_fatal() {
    let config = base_config(&["AAPL"]);
    let feed = RawFeed::new(vec![
        trade_tick("AAPL", t0() + ms(1000), dec!(100), 20),
        // Time runs backwards in the merged stream: the run must abort.
        trade_tick("AAPL", t0(), dec!(101), 20),
    ]);

    let mut engine = BacktestEngine::new(config);
    engine.add_strategy("AAPL", Box::new(Idle));
    let result = engine.run(feed).await;

    match result {
        Err(EngineError::Fatal(FatalError::TimeRegression { symbol, prev, got })) => {
            assert_eq!(symbol, "AAPL");
            assert_eq!(prev, t0() + ms(1000));
            assert_eq!(got, t0());
        }
        other => panic!("expected time-regression failure, got {other:?}"),
    }
}

#[tokio::test]
async fn run_without_strategy_is_config_error() {
    let config = base_config(&["AAPL"]);
    let engine = BacktestEngine::new(config);
    let result = engine
        .run(ReplayFeed::new(vec![trade_tick("AAPL", t0(), dec!(101), 20)]))
        .await;
    assert!(result.is_err());
}
