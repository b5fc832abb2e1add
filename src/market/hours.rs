//! Regular trading sessions per market

use super::Market;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use chrono_tz::{America::New_York, Asia::Kolkata, Tz};

/// A daily session in exchange-local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub tz: Tz,
    /// Opening time as (hour, minute)
    pub open: (u32, u32),
    /// Closing time as (hour, minute), inclusive
    pub close: (u32, u32),
}

const US_PRE_MARKET: (u32, u32) = (4, 0);

impl Session {
    fn contains(&self, seconds: u32) -> bool {
        seconds_of(self.open) <= seconds && seconds <= seconds_of(self.close)
    }
}

/// Regular session for `market`; `None` for venues that never close
pub fn session(market: Market) -> Option<Session> {
    match market {
        Market::Nse | Market::Bse => Some(Session {
            tz: Kolkata,
            open: (9, 15),
            close: (15, 30),
        }),
        Market::Nyse | Market::Nasdaq | Market::Amex => Some(Session {
            tz: New_York,
            open: (9, 30),
            close: (16, 0),
        }),
        Market::Crypto => None,
    }
}

/// Whether `market` is in its regular session at `at`
///
/// Crypto trades around the clock. Equity venues are closed on Saturday and
/// Sunday in exchange-local time. Exchange holidays are not modelled.
pub fn is_market_open(market: Market, at: DateTime<Utc>) -> bool {
    let Some(session) = session(market) else {
        return true;
    };
    let local = at.with_timezone(&session.tz);
    !is_weekend(local.weekday()) && session.contains(local.num_seconds_from_midnight())
}

/// Whether a US venue is in its pre-market window at `at`
pub fn is_pre_market(market: Market, at: DateTime<Utc>) -> bool {
    if !matches!(market, Market::Nyse | Market::Nasdaq | Market::Amex) {
        return false;
    }
    let local = at.with_timezone(&New_York);
    let seconds = local.num_seconds_from_midnight();
    !is_weekend(local.weekday())
        && seconds_of(US_PRE_MARKET) <= seconds
        && seconds < seconds_of((9, 30))
}

/// Next regular-session open strictly after `at`, skipping weekends
///
/// `None` for crypto.
pub fn next_open(market: Market, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let session = session(market)?;
    let local = at.with_timezone(&session.tz);
    let (hour, minute) = session.open;
    (0..8)
        .filter_map(|offset| {
            let date = local.date_naive() + Duration::days(offset);
            if is_weekend(date.weekday()) {
                return None;
            }
            date.and_hms_opt(hour, minute, 0)?
                .and_local_timezone(session.tz)
                .earliest()
        })
        .map(|open| open.with_timezone(&Utc))
        .find(|open| *open > at)
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

fn seconds_of((hour, minute): (u32, u32)) -> u32 {
    hour * 3600 + minute * 60
}
