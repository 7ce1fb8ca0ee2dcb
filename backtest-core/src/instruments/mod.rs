//! Instruments and exchange schedules.
//!
//! An [`Instrument`] pairs a symbol with the [`ExchangeSchedule`] that
//! governs Day-order expiry and the auction windows for on-open/on-close
//! orders. Schedules are defined in exchange-local time and handle the
//! timezone conversion internally.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

use crate::data::Timeframe;

/// Exchange trading schedule for one venue.
///
/// Wall-clock open/close plus the grace windows during which auction orders
/// stay eligible: an on-open order may still fire up to `open_grace` past the
/// open, an on-close order up to `close_grace` past the close.
#[derive(Debug, Clone)]
pub struct ExchangeSchedule {
    pub timezone: Tz,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub open_grace: Duration,
    pub close_grace: Duration,
}

fn default_open_grace() -> Duration {
    Duration::minutes(3)
}

fn default_close_grace() -> Duration {
    Duration::seconds(3)
}

impl ExchangeSchedule {
    pub fn new(timezone: Tz, market_open: NaiveTime, market_close: NaiveTime) -> Self {
        Self {
            timezone,
            market_open,
            market_close,
            open_grace: default_open_grace(),
            close_grace: default_close_grace(),
        }
    }

    /// US equities regular session, 09:30-16:00 New York.
    pub fn us_equities() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"),
            NaiveTime::from_hms_opt(16, 0, 0).expect("valid time"),
        )
    }

    /// Midnight (exchange time) of the day after `submitted` — the Day-order
    /// expiry instant.
    pub fn day_expiry(&self, submitted: DateTime<Utc>) -> DateTime<Utc> {
        let local = submitted.with_timezone(&self.timezone);
        let next_midnight = (local.date_naive() + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .expect("valid midnight");
        self.resolve_local(next_midnight)
    }

    /// End of the opening auction window on or after `submitted`:
    /// market open + grace, rolling to the next day when the window for the
    /// submission day has already passed.
    pub fn open_auction_deadline(&self, submitted: DateTime<Utc>) -> DateTime<Utc> {
        self.auction_deadline(submitted, self.market_open, self.open_grace)
    }

    /// End of the closing auction window on or after `submitted`.
    pub fn close_auction_deadline(&self, submitted: DateTime<Utc>) -> DateTime<Utc> {
        self.auction_deadline(submitted, self.market_close, self.close_grace)
    }

    fn auction_deadline(
        &self,
        submitted: DateTime<Utc>,
        mark: NaiveTime,
        grace: Duration,
    ) -> DateTime<Utc> {
        let local = submitted.with_timezone(&self.timezone);
        let same_day = local.date_naive().and_time(mark);
        let deadline = self.resolve_local(same_day) + grace;
        if deadline > submitted {
            deadline
        } else {
            let next_day = (local.date_naive() + Duration::days(1)).and_time(mark);
            self.resolve_local(next_day) + grace
        }
    }

    /// Whether a candle starting at `ts` spans the session open.
    pub fn is_session_open_candle(&self, ts: DateTime<Utc>, timeframe: Timeframe) -> bool {
        self.candle_spans(ts, timeframe, self.market_open)
    }

    /// Whether a candle starting at `ts` spans the session close.
    pub fn is_session_close_candle(&self, ts: DateTime<Utc>, timeframe: Timeframe) -> bool {
        self.candle_spans(ts, timeframe, self.market_close)
    }

    fn candle_spans(&self, ts: DateTime<Utc>, timeframe: Timeframe, mark: NaiveTime) -> bool {
        let local = ts.with_timezone(&self.timezone);
        let mark_instant = self.resolve_local(local.date_naive().and_time(mark));
        mark_instant >= ts && mark_instant < ts + timeframe.duration()
    }

    // DST gaps/overlaps resolve to the earliest valid instant.
    fn resolve_local(&self, naive: chrono::NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
            chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            chrono::LocalResult::None => {
                let shifted = naive + Duration::hours(1);
                self.timezone
                    .from_local_datetime(&shifted)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
            }
        }
    }
}

/// A tradable instrument. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub symbol: String,
    pub schedule: ExchangeSchedule,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, schedule: ExchangeSchedule) -> Self {
        Self {
            symbol: symbol.into(),
            schedule,
        }
    }

    /// Instrument on the US equities schedule.
    pub fn us_equity(symbol: impl Into<String>) -> Self {
        Self::new(symbol, ExchangeSchedule::us_equities())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}
