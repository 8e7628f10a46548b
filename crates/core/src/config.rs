use anyhow::Context;
use chrono::FixedOffset;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::BuySignal;
use crate::filter::{
    FilterSettings, DEFAULT_MIN_NOTIFY_INTERVAL, DEFAULT_NOTIFY_THRESHOLD, DEFAULT_VOLUME_ALERT,
};
use crate::pipeline::{
    parse_watchlist, DispatchPacing, PipelineSettings, DEFAULT_HISTORY_LOOKBACK,
    DEFAULT_MAX_WORKERS,
};
use crate::scheduler::{DEFAULT_POLL_INTERVAL, DEFAULT_TIME_POINTS};
use crate::time::{market_offset, HolidayDetection, TradingCalendar, DEFAULT_MARKET_UTC_OFFSET_HOURS};

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub sentry_dsn: Option<String>,
    pub data_provider_base_url: Option<String>,
    pub data_provider_api_key: Option<String>,
    pub analyzer_base_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL").ok(),
            data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
            analyzer_base_url: std::env::var("ANALYZER_BASE_URL").ok(),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }

    pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
        self.data_provider_base_url
            .as_deref()
            .context("DATA_PROVIDER_BASE_URL is required")
    }

    pub fn require_analyzer_base_url(&self) -> anyhow::Result<&str> {
        self.analyzer_base_url
            .as_deref()
            .context("ANALYZER_BASE_URL is required")
    }
}

/// Tunables for the intraday pipeline, filter and scheduler.
///
/// Unset or blank variables take their defaults; a value that is set but malformed is an
/// error rather than a silent fallback.
#[derive(Debug, Clone)]
pub struct IntradaySettings {
    pub max_workers: usize,
    pub sleep_min_secs: f64,
    pub sleep_max_secs: f64,
    pub notify_threshold: i32,
    pub volume_alert: f64,
    pub min_notify_interval_secs: u64,
    pub signal_types: Vec<BuySignal>,
    pub time_points: Vec<String>,
    pub holiday_detection: HolidayDetection,
    pub poll_secs: u64,
    pub utc_offset_hours: i32,
    pub watchlist: Vec<String>,
    pub history_lookback: usize,
}

impl IntradaySettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let signal_types = match get("INTRADAY_SIGNAL_TYPES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<BuySignal>())
                .collect::<anyhow::Result<Vec<_>>>()
                .context("INTRADAY_SIGNAL_TYPES")?,
            None => vec![BuySignal::StrongBuy, BuySignal::Buy, BuySignal::StrongSell],
        };

        let time_points = match get("INTRADAY_TIME_POINTS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_TIME_POINTS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            max_workers: parse_or(&get, "INTRADAY_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            sleep_min_secs: parse_or(&get, "INTRADAY_SLEEP_MIN_SECS", 2.0)?,
            sleep_max_secs: parse_or(&get, "INTRADAY_SLEEP_MAX_SECS", 3.0)?,
            notify_threshold: parse_or(&get, "INTRADAY_NOTIFY_THRESHOLD", DEFAULT_NOTIFY_THRESHOLD)?,
            volume_alert: parse_or(&get, "INTRADAY_VOLUME_ALERT", DEFAULT_VOLUME_ALERT)?,
            min_notify_interval_secs: parse_or(
                &get,
                "INTRADAY_MIN_NOTIFY_INTERVAL_SECS",
                DEFAULT_MIN_NOTIFY_INTERVAL.as_secs(),
            )?,
            signal_types,
            time_points,
            holiday_detection: parse_or(&get, "INTRADAY_HOLIDAY_DETECTION", HolidayDetection::Simple)?,
            poll_secs: parse_or(&get, "INTRADAY_POLL_SECS", DEFAULT_POLL_INTERVAL.as_secs())?,
            utc_offset_hours: parse_or(
                &get,
                "MARKET_UTC_OFFSET_HOURS",
                DEFAULT_MARKET_UTC_OFFSET_HOURS,
            )?,
            watchlist: get("STOCK_LIST")
                .map(|raw| parse_watchlist(&raw))
                .unwrap_or_default(),
            history_lookback: parse_or(&get, "HISTORY_LOOKBACK_BARS", DEFAULT_HISTORY_LOOKBACK)?,
        })
    }

    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            notify_threshold: self.notify_threshold,
            volume_alert: self.volume_alert,
            min_notify_interval: Duration::from_secs(self.min_notify_interval_secs),
            allowed_signals: self.signal_types.iter().copied().collect(),
        }
    }

    pub fn pipeline_settings(&self) -> anyhow::Result<PipelineSettings> {
        let settings = PipelineSettings {
            max_workers: self.max_workers,
            pacing: DispatchPacing::from_secs_f64(self.sleep_min_secs, self.sleep_max_secs)?,
            history_lookback: self.history_lookback,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn market_offset(&self) -> anyhow::Result<FixedOffset> {
        market_offset(self.utc_offset_hours)
    }

    pub fn calendar(&self) -> TradingCalendar {
        TradingCalendar::from_mode(self.holiday_detection)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}
