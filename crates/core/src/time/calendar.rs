use anyhow::Context;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::Arc;

/// Exchange holiday lookup. Errors mean "cannot tell", not "closed".
pub trait HolidayCalendar: Send + Sync {
    fn is_trading_day(&self, date: NaiveDate) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayDetection {
    /// Weekends only.
    Simple,
    /// Weekends plus an exchange holiday calendar.
    Advanced,
}

impl HolidayDetection {
    pub fn as_str(self) -> &'static str {
        match self {
            HolidayDetection::Simple => "simple",
            HolidayDetection::Advanced => "advanced",
        }
    }
}

impl FromStr for HolidayDetection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(HolidayDetection::Simple),
            "advanced" => Ok(HolidayDetection::Advanced),
            other => anyhow::bail!("unknown holiday detection mode: {other} (expected simple|advanced)"),
        }
    }
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Decides whether the market is open on a date.
#[derive(Clone)]
pub struct TradingCalendar {
    holidays: Option<Arc<dyn HolidayCalendar>>,
}

impl std::fmt::Debug for TradingCalendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingCalendar")
            .field("mode", &self.mode())
            .finish()
    }
}

impl TradingCalendar {
    pub fn simple() -> Self {
        Self { holidays: None }
    }

    pub fn advanced(holidays: Arc<dyn HolidayCalendar>) -> Self {
        Self {
            holidays: Some(holidays),
        }
    }

    /// Builds the calendar for a mode. Advanced mode degrades to simple when the
    /// configured holiday data cannot be loaded.
    pub fn from_mode(mode: HolidayDetection) -> Self {
        match mode {
            HolidayDetection::Simple => Self::simple(),
            HolidayDetection::Advanced => match ConfiguredHolidays::from_env() {
                Ok(holidays) => {
                    tracing::info!(
                        holidays = holidays.len(),
                        "holiday calendar enabled"
                    );
                    Self::advanced(Arc::new(holidays))
                }
                Err(err) => {
                    let detail = format!("{err:#}");
                    tracing::warn!(
                        error = %detail,
                        "holiday calendar unavailable; using weekend-only detection"
                    );
                    Self::simple()
                }
            },
        }
    }

    pub fn mode(&self) -> HolidayDetection {
        if self.holidays.is_some() {
            HolidayDetection::Advanced
        } else {
            HolidayDetection::Simple
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        let Some(holidays) = &self.holidays else {
            let open = is_weekday(date);
            if !open {
                tracing::debug!(%date, "weekend");
            }
            return open;
        };

        match holidays.is_trading_day(date) {
            Ok(open) => {
                if !open {
                    tracing::debug!(%date, "market holiday or weekend");
                }
                open
            }
            Err(err) => {
                let detail = format!("{err:#}");
                tracing::warn!(
                    %date,
                    error = %detail,
                    "holiday lookup failed; falling back to weekday check"
                );
                is_weekday(date)
            }
        }
    }
}

/// Exchange closures supplied through `MARKET_HOLIDAYS` and `MARKET_HOLIDAYS_FILE`.
///
/// A year counts as covered once at least one closure in it is configured; lookups in
/// any other year fail so the caller can fall back to the weekday rule.
#[derive(Debug, Clone)]
pub struct ConfiguredHolidays {
    dates: HashSet<NaiveDate>,
    years: BTreeSet<i32>,
}

impl ConfiguredHolidays {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let dates: HashSet<NaiveDate> = dates.into_iter().collect();
        let years = dates.iter().map(|d| d.year()).collect();
        Self { dates, years }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let mut dates = Vec::new();

        if let Ok(s) = std::env::var("MARKET_HOLIDAYS") {
            dates.extend(parse_holiday_list(s.split(','))?);
        }

        if let Some(path) = std::env::var("MARKET_HOLIDAYS_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read holiday file {path}"))?;
            dates.extend(parse_holiday_list(text.lines())?);
        }

        anyhow::ensure!(
            !dates.is_empty(),
            "advanced holiday detection needs MARKET_HOLIDAYS_FILE or MARKET_HOLIDAYS"
        );
        Ok(Self::new(dates))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn covers(&self, year: i32) -> bool {
        self.years.contains(&year)
    }
}

impl HolidayCalendar for ConfiguredHolidays {
    fn is_trading_day(&self, date: NaiveDate) -> anyhow::Result<bool> {
        anyhow::ensure!(
            self.covers(date.year()),
            "no holiday data for {} (covered: {:?})",
            date.year(),
            self.years
        );
        Ok(is_weekday(date) && !self.dates.contains(&date))
    }
}

fn parse_holiday_list<'a>(parts: impl Iterator<Item = &'a str>) -> anyhow::Result<Vec<NaiveDate>> {
    let mut out = Vec::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() || part.starts_with('#') {
            continue;
        }
        let d = NaiveDate::parse_from_str(part, "%Y-%m-%d")
            .with_context(|| format!("invalid holiday date: {part}"))?;
        out.push(d);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct BrokenCalendar;

    impl HolidayCalendar for BrokenCalendar {
        fn is_trading_day(&self, _date: NaiveDate) -> anyhow::Result<bool> {
            anyhow::bail!("calendar service unreachable")
        }
    }

    #[test]
    fn simple_mode_is_weekdays_only() {
        let cal = TradingCalendar::simple();
        // 2026-03-02 is a Monday.
        for day in 2..=6 {
            assert!(cal.is_trading_day(d(2026, 3, day)), "day {day}");
        }
        assert!(!cal.is_trading_day(d(2026, 3, 7)));
        assert!(!cal.is_trading_day(d(2026, 3, 8)));
        // Simple mode ignores holidays.
        assert!(cal.is_trading_day(d(2026, 10, 1)));
    }

    fn golden_week_2026() -> ConfiguredHolidays {
        ConfiguredHolidays::new((1..=7).map(|day| d(2026, 10, day)).chain([d(2026, 2, 17)]))
    }

    #[test]
    fn advanced_mode_closes_on_configured_holidays() {
        let cal = TradingCalendar::advanced(Arc::new(golden_week_2026()));
        assert_eq!(cal.mode(), HolidayDetection::Advanced);
        for day in [1, 2, 5, 6, 7] {
            assert!(!cal.is_trading_day(d(2026, 10, day)), "2026-10-{day:02}");
        }
        assert!(!cal.is_trading_day(d(2026, 2, 17)));
        assert!(!cal.is_trading_day(d(2026, 3, 7)));
        assert!(cal.is_trading_day(d(2026, 2, 18)));
        assert!(cal.is_trading_day(d(2026, 10, 8)));
    }

    #[test]
    fn nothing_is_claimed_without_configuration() {
        let holidays = ConfiguredHolidays::new(Vec::<NaiveDate>::new());
        assert!(holidays.is_empty());
        assert!(holidays.is_trading_day(d(2026, 10, 5)).is_err());
        assert!(holidays.is_trading_day(d(2026, 2, 17)).is_err());
    }

    #[test]
    fn lookup_failure_falls_back_to_weekdays() {
        let cal = TradingCalendar::advanced(Arc::new(BrokenCalendar));
        assert!(cal.is_trading_day(d(2026, 10, 1)));
        assert!(!cal.is_trading_day(d(2026, 10, 3)));
    }

    #[test]
    fn configured_holidays_refuse_uncovered_years() {
        let holidays = golden_week_2026();
        assert!(holidays.covers(2026));
        assert!(holidays.is_trading_day(d(2026, 3, 3)).unwrap());
        assert!(holidays.is_trading_day(d(2027, 3, 3)).is_err());

        // An uncovered year degrades to the weekday rule through the calendar.
        let cal = TradingCalendar::advanced(Arc::new(holidays));
        assert!(cal.is_trading_day(d(2027, 10, 4)));
        assert!(!cal.is_trading_day(d(2027, 10, 2)));
    }

    #[test]
    fn parses_holiday_lists_and_rejects_garbage() {
        let lines = ["2026-02-17", " ", "# lunar new year", "2026-02-18 "];
        let parsed = parse_holiday_list(lines.into_iter()).unwrap();
        assert_eq!(parsed, vec![d(2026, 2, 17), d(2026, 2, 18)]);
        assert!(parse_holiday_list(["2026/02/17"].into_iter()).is_err());
    }

    #[test]
    fn parses_detection_mode() {
        assert_eq!("Simple".parse::<HolidayDetection>().unwrap(), HolidayDetection::Simple);
        assert_eq!(" advanced ".parse::<HolidayDetection>().unwrap(), HolidayDetection::Advanced);
        assert!("lunar".parse::<HolidayDetection>().is_err());
    }
}
