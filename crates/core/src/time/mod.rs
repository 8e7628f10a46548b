pub mod calendar;

use anyhow::Context;
use chrono::{FixedOffset, NaiveDateTime, Utc};

pub use calendar::{ConfiguredHolidays, HolidayCalendar, HolidayDetection, TradingCalendar};

/// China A-share exchanges run on UTC+8.
pub const DEFAULT_MARKET_UTC_OFFSET_HOURS: i32 = 8;

pub fn market_offset(hours: i32) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .with_context(|| format!("invalid market UTC offset: {hours}h"))
}

/// Current wall-clock time at the exchange.
pub fn market_now(offset: FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(&offset).naive_local()
}
