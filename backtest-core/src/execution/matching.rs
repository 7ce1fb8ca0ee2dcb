//! Matching rules for active orders against market data.
//!
//! Pure functions: one order against one price observation. The broker
//! applies the outcome (fill bookkeeping, cancels, event emission).
//!
//! Tick-mode fills are capped by the observed size on the matching tick;
//! candle-mode fills execute the full remaining quantity. Exact equality at
//! a limit price is governed by the strict-limit flag: strict means no fill.

use rust_decimal::Decimal;

use crate::data::{Candle, Tick};
use crate::orders::{Order, OrderSide, OrderType};

/// Outcome of matching one order against one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// No execution; the order keeps working
    None,
    /// Execute `qty` at `price`
    Fill { qty: u64, price: Decimal },
    /// Auction partial: execute and cancel the remainder
    FillThenCancel { qty: u64, price: Decimal },
    /// Auction miss: cancel the order
    Cancel,
}

/// Match one active order against a tick.
pub fn match_tick(order: &Order, tick: &Tick, strict_limit: bool) -> MatchOutcome {
    match order.order_type {
        OrderType::Market => match_tick_market(order, tick),
        OrderType::Limit => match_tick_limit(order, tick, strict_limit),
        OrderType::Stop => match_tick_stop(order, tick),
        OrderType::LimitOnOpen => {
            if tick.is_opening {
                match_tick_limit_auction(order, tick, strict_limit)
            } else {
                MatchOutcome::None
            }
        }
        OrderType::LimitOnClose => {
            if tick.is_closing {
                match_tick_limit_auction(order, tick, strict_limit)
            } else {
                MatchOutcome::None
            }
        }
        OrderType::MarketOnOpen => {
            if tick.is_opening {
                match_tick_market_auction(order, tick)
            } else {
                MatchOutcome::None
            }
        }
        OrderType::MarketOnClose => {
            if tick.is_closing {
                match_tick_market_auction(order, tick)
            } else {
                MatchOutcome::None
            }
        }
    }
}

fn match_tick_market(order: &Order, tick: &Tick) -> MatchOutcome {
    if let Some(quote) = &tick.quote {
        let (price, size) = match order.side {
            OrderSide::Buy => (quote.ask_price, quote.ask_size),
            OrderSide::Sell => (quote.bid_price, quote.bid_size),
        };
        return MatchOutcome::Fill {
            qty: order.leaves_qty().min(size),
            price,
        };
    }
    if let Some(trade) = &tick.trade {
        return MatchOutcome::Fill {
            qty: order.leaves_qty(),
            price: trade.last_price,
        };
    }
    MatchOutcome::None
}

fn match_tick_limit(order: &Order, tick: &Tick, strict_limit: bool) -> MatchOutcome {
    let Some(limit) = order.price else {
        return MatchOutcome::None;
    };
    let Some(trade) = &tick.trade else {
        return MatchOutcome::None;
    };

    let crossed = match order.side {
        OrderSide::Buy => trade.last_price < limit,
        OrderSide::Sell => trade.last_price > limit,
    };
    let at_limit = trade.last_price == limit && !strict_limit;

    if crossed || at_limit {
        MatchOutcome::Fill {
            qty: order.leaves_qty().min(trade.last_size),
            price: limit,
        }
    } else {
        MatchOutcome::None
    }
}

fn match_tick_stop(order: &Order, tick: &Tick) -> MatchOutcome {
    let Some(stop) = order.price else {
        return MatchOutcome::None;
    };
    let Some(trade) = &tick.trade else {
        return MatchOutcome::None;
    };

    let triggered = match order.side {
        OrderSide::Buy => trade.last_price >= stop,
        OrderSide::Sell => trade.last_price <= stop,
    };
    if !triggered {
        return MatchOutcome::None;
    }

    // Quote side gives the executable price and absorbs the full remainder;
    // trade-only ticks cap the fill at the printed size.
    match &tick.quote {
        Some(quote) => MatchOutcome::Fill {
            qty: order.leaves_qty(),
            price: match order.side {
                OrderSide::Buy => quote.ask_price,
                OrderSide::Sell => quote.bid_price,
            },
        },
        None => MatchOutcome::Fill {
            qty: order.leaves_qty().min(trade.last_size),
            price: trade.last_price,
        },
    }
}

// Auction limit check against the auction print. A miss cancels; a partial
// against the printed size cancels the remainder.
fn match_tick_limit_auction(order: &Order, tick: &Tick, strict_limit: bool) -> MatchOutcome {
    let Some(limit) = order.price else {
        return MatchOutcome::None;
    };
    let Some(trade) = &tick.trade else {
        return MatchOutcome::None;
    };

    let missed = match order.side {
        OrderSide::Buy => trade.last_price > limit,
        OrderSide::Sell => trade.last_price < limit,
    };
    if missed || (trade.last_price == limit && strict_limit) {
        return MatchOutcome::Cancel;
    }

    let leaves = order.leaves_qty();
    let qty = leaves.min(trade.last_size);
    if qty < leaves {
        MatchOutcome::FillThenCancel {
            qty,
            price: trade.last_price,
        }
    } else {
        MatchOutcome::Fill {
            qty,
            price: trade.last_price,
        }
    }
}

fn match_tick_market_auction(order: &Order, tick: &Tick) -> MatchOutcome {
    match &tick.trade {
        Some(trade) => MatchOutcome::Fill {
            qty: order.leaves_qty(),
            price: trade.last_price,
        },
        None => MatchOutcome::None,
    }
}

/// Match one active order against a candle-open price point.
pub fn match_candle_open(
    order: &Order,
    open: Decimal,
    is_session_open: bool,
    strict_limit: bool,
) -> MatchOutcome {
    let leaves = order.leaves_qty();
    match order.order_type {
        OrderType::Market => MatchOutcome::Fill { qty: leaves, price: open },
        OrderType::Limit => {
            let Some(limit) = order.price else {
                return MatchOutcome::None;
            };
            let fills = match order.side {
                OrderSide::Buy => open < limit || (open == limit && !strict_limit),
                OrderSide::Sell => open > limit || (open == limit && !strict_limit),
            };
            if fills {
                MatchOutcome::Fill { qty: leaves, price: open }
            } else {
                MatchOutcome::None
            }
        }
        OrderType::Stop => {
            let Some(stop) = order.price else {
                return MatchOutcome::None;
            };
            match order.side {
                OrderSide::Buy if open >= stop => MatchOutcome::Fill {
                    qty: leaves,
                    price: open.max(stop),
                },
                OrderSide::Sell if open <= stop => MatchOutcome::Fill {
                    qty: leaves,
                    price: open.min(stop),
                },
                _ => MatchOutcome::None,
            }
        }
        OrderType::MarketOnOpen => {
            if is_session_open {
                MatchOutcome::Fill { qty: leaves, price: open }
            } else {
                MatchOutcome::None
            }
        }
        OrderType::LimitOnOpen => {
            if !is_session_open {
                return MatchOutcome::None;
            }
            let Some(limit) = order.price else {
                return MatchOutcome::None;
            };
            let fills = match order.side {
                OrderSide::Buy => open < limit || (open == limit && !strict_limit),
                OrderSide::Sell => open > limit || (open == limit && !strict_limit),
            };
            if fills {
                MatchOutcome::Fill { qty: leaves, price: open }
            } else {
                MatchOutcome::Cancel
            }
        }
        OrderType::LimitOnClose | OrderType::MarketOnClose => MatchOutcome::None,
    }
}

/// Match one active order against a completed candle.
pub fn match_candle_close(
    order: &Order,
    candle: &Candle,
    is_session_close: bool,
    strict_limit: bool,
) -> MatchOutcome {
    let leaves = order.leaves_qty();
    match order.order_type {
        OrderType::Market => MatchOutcome::Fill {
            qty: leaves,
            price: candle.close,
        },
        OrderType::Limit => {
            let Some(limit) = order.price else {
                return MatchOutcome::None;
            };
            // The candle's extreme tells us whether the bar traded through
            // the limit at some point.
            let crossed = match order.side {
                OrderSide::Buy => {
                    candle.low < limit || (candle.low == limit && !strict_limit)
                }
                OrderSide::Sell => {
                    candle.high > limit || (candle.high == limit && !strict_limit)
                }
            };
            if crossed {
                MatchOutcome::Fill { qty: leaves, price: limit }
            } else {
                MatchOutcome::None
            }
        }
        OrderType::MarketOnClose => {
            if is_session_close {
                MatchOutcome::Fill {
                    qty: leaves,
                    price: candle.close,
                }
            } else {
                MatchOutcome::None
            }
        }
        OrderType::LimitOnClose => {
            if !is_session_close {
                return MatchOutcome::None;
            }
            let Some(limit) = order.price else {
                return MatchOutcome::None;
            };
            let fills = match order.side {
                OrderSide::Buy => {
                    candle.close < limit || (candle.close == limit && !strict_limit)
                }
                OrderSide::Sell => {
                    candle.close > limit || (candle.close == limit && !strict_limit)
                }
            };
            if fills {
                MatchOutcome::Fill {
                    qty: leaves,
                    price: candle.close,
                }
            } else {
                MatchOutcome::Cancel
            }
        }
        // Open-side types wait for the candle-open event.
        OrderType::Stop | OrderType::MarketOnOpen | OrderType::LimitOnOpen => MatchOutcome::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Timeframe;
    use crate::orders::{OrderStatus, TimeInForce};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
    }

    fn confirmed(mut order: Order) -> Order {
        order.transition_to(OrderStatus::Confirmed).unwrap();
        order
    }

    fn limit_buy(price: Decimal, qty: u64) -> Order {
        confirmed(
            Order::limit("AAPL", OrderSide::Buy, qty, price, TimeInForce::GTC, ts())
                .with_id("AAPL-BUY-1")
                .build()
                .unwrap(),
        )
    }

    fn limit_sell(price: Decimal, qty: u64) -> Order {
        confirmed(
            Order::limit("AAPL", OrderSide::Sell, qty, price, TimeInForce::GTC, ts())
                .with_id("AAPL-SELL-1")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_limit_buy_fills_below_limit_at_limit_price() {
        let order = limit_buy(dec!(100), 10);
        let tick = Tick::trade("AAPL", ts(), dec!(99), 20);

        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );
    }

    #[test]
    fn test_limit_buy_capped_by_tick_size() {
        let order = limit_buy(dec!(100), 10);
        let tick = Tick::trade("AAPL", ts(), dec!(99), 3);

        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 3,
                price: dec!(100)
            }
        );
    }

    #[test]
    fn test_limit_equality_honors_strict_flag() {
        let order = limit_buy(dec!(100), 10);
        let tick = Tick::trade("AAPL", ts(), dec!(100), 20);

        assert_eq!(match_tick(&order, &tick, true), MatchOutcome::None);
        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );
    }

    #[test]
    fn test_limit_sell_symmetric() {
        let order = limit_sell(dec!(100), 10);

        let above = Tick::trade("AAPL", ts(), dec!(101), 20);
        assert_eq!(
            match_tick(&order, &above, true),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );

        let below = Tick::trade("AAPL", ts(), dec!(99), 20);
        assert_eq!(match_tick(&order, &below, false), MatchOutcome::None);
    }

    #[test]
    fn test_limit_needs_trade_leg() {
        let order = limit_buy(dec!(100), 10);
        let tick = Tick::quote("AAPL", ts(), dec!(98), 100, dec!(99), 100);
        assert_eq!(match_tick(&order, &tick, false), MatchOutcome::None);
    }

    #[test]
    fn test_market_fills_at_quote_side() {
        let order = confirmed(
            Order::market("AAPL", OrderSide::Buy, 10, TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );
        let tick = Tick::quote("AAPL", ts(), dec!(99), 100, dec!(101), 4);

        // Buy pays the ask, capped by ask size.
        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 4,
                price: dec!(101)
            }
        );

        let sell = confirmed(
            Order::market("AAPL", OrderSide::Sell, 10, TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );
        assert_eq!(
            match_tick(&sell, &tick, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(99)
            }
        );
    }

    #[test]
    fn test_market_trade_only_fills_leaves_at_last() {
        let order = confirmed(
            Order::market("AAPL", OrderSide::Buy, 10, TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );
        let tick = Tick::trade("AAPL", ts(), dec!(100.5), 2);
        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100.5)
            }
        );
    }

    #[test]
    fn test_stop_buy_triggers_above() {
        let order = confirmed(
            Order::stop("AAPL", OrderSide::Buy, 10, dec!(100), TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );

        let below = Tick::trade("AAPL", ts(), dec!(99), 20);
        assert_eq!(match_tick(&order, &below, false), MatchOutcome::None);

        let at = Tick::trade("AAPL", ts(), dec!(100), 20);
        assert_eq!(
            match_tick(&order, &at, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );

        // Quote present: fills the full remainder at the ask.
        let with_quote = Tick::trade("AAPL", ts(), dec!(100), 2).with_quote(
            dec!(99.9),
            50,
            dec!(100.1),
            50,
        );
        assert_eq!(
            match_tick(&order, &with_quote, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100.1)
            }
        );
    }

    #[test]
    fn test_stop_sell_triggers_below() {
        let order = confirmed(
            Order::stop("AAPL", OrderSide::Sell, 10, dec!(100), TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );
        let tick = Tick::trade("AAPL", ts(), dec!(99), 5);
        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 5,
                price: dec!(99)
            }
        );
    }

    #[test]
    fn test_loo_ignores_regular_ticks() {
        let order = confirmed(
            Order::auction(OrderType::LimitOnOpen, "AAPL", OrderSide::Buy, 10, ts())
                .with_price(dec!(100))
                .build()
                .unwrap(),
        );
        let tick = Tick::trade("AAPL", ts(), dec!(99), 20);
        assert_eq!(match_tick(&order, &tick, false), MatchOutcome::None);
    }

    #[test]
    fn test_loo_fills_at_auction_print() {
        let order = confirmed(
            Order::auction(OrderType::LimitOnOpen, "AAPL", OrderSide::Buy, 10, ts())
                .with_price(dec!(100))
                .build()
                .unwrap(),
        );
        let tick = Tick::trade("AAPL", ts(), dec!(99.5), 20).opening();
        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(99.5)
            }
        );
    }

    #[test]
    fn test_loo_miss_cancels() {
        let order = confirmed(
            Order::auction(OrderType::LimitOnOpen, "AAPL", OrderSide::Buy, 10, ts())
                .with_price(dec!(100))
                .build()
                .unwrap(),
        );
        let tick = Tick::trade("AAPL", ts(), dec!(101), 20).opening();
        assert_eq!(match_tick(&order, &tick, false), MatchOutcome::Cancel);
    }

    #[test]
    fn test_loo_partial_cancels_remainder() {
        let order = confirmed(
            Order::auction(OrderType::LimitOnOpen, "AAPL", OrderSide::Buy, 10, ts())
                .with_price(dec!(100))
                .build()
                .unwrap(),
        );
        let tick = Tick::trade("AAPL", ts(), dec!(99), 4).opening();
        assert_eq!(
            match_tick(&order, &tick, false),
            MatchOutcome::FillThenCancel {
                qty: 4,
                price: dec!(99)
            }
        );
    }

    #[test]
    fn test_moc_fills_on_closing_tick() {
        let order = confirmed(
            Order::auction(OrderType::MarketOnClose, "AAPL", OrderSide::Sell, 10, ts())
                .build()
                .unwrap(),
        );

        let regular = Tick::trade("AAPL", ts(), dec!(100), 20);
        assert_eq!(match_tick(&order, &regular, false), MatchOutcome::None);

        let closing = Tick::trade("AAPL", ts(), dec!(100), 20).closing();
        assert_eq!(
            match_tick(&order, &closing, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );
    }

    #[test]
    fn test_candle_open_market_and_stop() {
        let market = confirmed(
            Order::market("AAPL", OrderSide::Buy, 10, TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );
        assert_eq!(
            match_candle_open(&market, dec!(100), false, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );

        // Gap through the stop: buy fills at the worse of open and stop.
        let stop = confirmed(
            Order::stop("AAPL", OrderSide::Buy, 10, dec!(95), TimeInForce::GTC, ts())
                .build()
                .unwrap(),
        );
        assert_eq!(
            match_candle_open(&stop, dec!(100), false, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );
    }

    #[test]
    fn test_candle_open_limit() {
        let order = limit_buy(dec!(100), 10);
        assert_eq!(
            match_candle_open(&order, dec!(99), false, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(99)
            }
        );
        assert_eq!(
            match_candle_open(&order, dec!(101), false, false),
            MatchOutcome::None
        );
        // Strict equality does not fill.
        assert_eq!(
            match_candle_open(&order, dec!(100), false, true),
            MatchOutcome::None
        );
    }

    #[test]
    fn test_candle_close_limit_uses_bar_range() {
        let order = limit_buy(dec!(100), 10);
        let crossing = Candle::new(
            "AAPL",
            ts(),
            Timeframe::Minute,
            dec!(102),
            dec!(103),
            dec!(99),
            dec!(101),
            1000,
        );
        assert_eq!(
            match_candle_close(&order, &crossing, false, true),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );

        let above = Candle::new(
            "AAPL",
            ts(),
            Timeframe::Minute,
            dec!(102),
            dec!(103),
            dec!(101),
            dec!(101),
            1000,
        );
        assert_eq!(
            match_candle_close(&order, &above, false, false),
            MatchOutcome::None
        );
    }

    #[test]
    fn test_candle_session_gating_for_auction_orders() {
        let moo = confirmed(
            Order::auction(OrderType::MarketOnOpen, "AAPL", OrderSide::Buy, 10, ts())
                .build()
                .unwrap(),
        );
        assert_eq!(
            match_candle_open(&moo, dec!(100), false, false),
            MatchOutcome::None
        );
        assert_eq!(
            match_candle_open(&moo, dec!(100), true, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100)
            }
        );

        let moc = confirmed(
            Order::auction(OrderType::MarketOnClose, "AAPL", OrderSide::Sell, 10, ts())
                .build()
                .unwrap(),
        );
        let candle = Candle::new(
            "AAPL",
            ts(),
            Timeframe::Minute,
            dec!(100),
            dec!(101),
            dec!(99),
            dec!(100.5),
            1000,
        );
        assert_eq!(
            match_candle_close(&moc, &candle, false, false),
            MatchOutcome::None
        );
        assert_eq!(
            match_candle_close(&moc, &candle, true, false),
            MatchOutcome::Fill {
                qty: 10,
                price: dec!(100.5)
            }
        );
    }
}
