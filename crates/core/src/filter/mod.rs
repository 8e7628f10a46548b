use crate::domain::{AnalysisResult, BuySignal, MacdStatus, TrendStatus};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_NOTIFY_THRESHOLD: i32 = 60;
pub const DEFAULT_VOLUME_ALERT: f64 = 3.0;
pub const DEFAULT_MIN_NOTIFY_INTERVAL: Duration = Duration::from_secs(1800);

// A score move of this size counts as a material change for dedup and neutral signals.
pub const SCORE_CHANGE_THRESHOLD: u32 = 15;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

#[derive(Debug, Clone)]
pub struct FilterSettings {
    pub notify_threshold: i32,
    pub volume_alert: f64,
    pub min_notify_interval: Duration,
    pub allowed_signals: HashSet<BuySignal>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            notify_threshold: DEFAULT_NOTIFY_THRESHOLD,
            volume_alert: DEFAULT_VOLUME_ALERT,
            min_notify_interval: DEFAULT_MIN_NOTIFY_INTERVAL,
            allowed_signals: default_allowed_signals(),
        }
    }
}

pub fn default_allowed_signals() -> HashSet<BuySignal> {
    [BuySignal::StrongBuy, BuySignal::Buy, BuySignal::StrongSell]
        .into_iter()
        .collect()
}

impl FilterSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.volume_alert.is_finite() && self.volume_alert >= 0.0,
            "volume alert multiple must be a non-negative number (got {})",
            self.volume_alert
        );
        Ok(())
    }
}

/// Last notification sent for a symbol in the current session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotificationRecord {
    pub notified_at: DateTime<Utc>,
    pub signal: BuySignal,
    pub score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotifyReason {
    StrongBuy,
    StrongSell,
    VolumeSpike(f64),
    MacdCross(MacdStatus),
    RsiOversold(f64),
    RsiOverbought(f64),
    Reversal { from: BuySignal, to: BuySignal },
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuppressReason {
    Duplicate { elapsed_secs: i64, score_change: u32 },
    BelowThreshold,
    SignalNotAllowed,
    NeutralUnchanged { score_change: u32 },
    Consolidation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Notify(NotifyReason),
    Suppress(SuppressReason),
}

impl Decision {
    pub fn is_notify(&self) -> bool {
        matches!(self, Decision::Notify(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    pub cached_stocks: usize,
    pub threshold: i32,
    pub volume_alert: f64,
    pub min_interval_secs: u64,
    pub allowed_signals: Vec<BuySignal>,
}

/// Decides which analysis results are worth surfacing.
///
/// Holds one [`NotificationRecord`] per symbol. A decision for a symbol holds that
/// symbol's map entry from read to write, so concurrent evaluations of the same code
/// serialize and the last writer wins; distinct codes never contend on the same entry.
#[derive(Debug)]
pub struct ResultFilter {
    settings: FilterSettings,
    last_notifications: DashMap<String, NotificationRecord>,
}

impl ResultFilter {
    pub fn new(settings: FilterSettings) -> anyhow::Result<Self> {
        settings.validate()?;

        tracing::info!(
            threshold = settings.notify_threshold,
            volume_alert = settings.volume_alert,
            min_interval_secs = settings.min_notify_interval.as_secs(),
            "result filter initialized"
        );

        Ok(Self {
            settings,
            last_notifications: DashMap::new(),
        })
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn should_notify(&self, result: &AnalysisResult) -> bool {
        self.evaluate_at(result, Utc::now()).is_notify()
    }

    /// Runs the decision procedure as of `now`, recording the result when it notifies.
    pub fn evaluate_at(&self, result: &AnalysisResult, now: DateTime<Utc>) -> Decision {
        let code = result.code.as_str();
        let entry = self.last_notifications.entry(result.code.clone());
        let previous = match &entry {
            Entry::Occupied(o) => Some(*o.get()),
            Entry::Vacant(_) => None,
        };

        let decision = decide(&self.settings, result, previous.as_ref(), now);

        match decision {
            Decision::Notify(reason) => {
                entry.insert(NotificationRecord {
                    notified_at: now,
                    signal: result.buy_signal,
                    score: result.signal_score,
                });
                tracing::info!(
                    code,
                    signal = %result.buy_signal,
                    score = result.signal_score,
                    ?reason,
                    "signal accepted"
                );
            }
            Decision::Suppress(reason) => {
                tracing::debug!(
                    code,
                    signal = %result.buy_signal,
                    score = result.signal_score,
                    ?reason,
                    "signal suppressed"
                );
            }
        }

        decision
    }

    pub fn last_notification(&self, code: &str) -> Option<NotificationRecord> {
        self.last_notifications.get(code).map(|r| *r.value())
    }

    /// Forget every symbol. Run once at the start of each trading session.
    pub fn clear_cache(&self) {
        let cleared = self.last_notifications.len();
        self.last_notifications.clear();
        tracing::info!(cleared, "result filter cache cleared");
    }

    pub fn stats(&self) -> FilterStats {
        let mut allowed_signals: Vec<BuySignal> =
            self.settings.allowed_signals.iter().copied().collect();
        allowed_signals.sort_by_key(|s| BuySignal::ALL.iter().position(|x| x == s));

        FilterStats {
            cached_stocks: self.last_notifications.len(),
            threshold: self.settings.notify_threshold,
            volume_alert: self.settings.volume_alert,
            min_interval_secs: self.settings.min_notify_interval.as_secs(),
            allowed_signals,
        }
    }
}

fn decide(
    settings: &FilterSettings,
    result: &AnalysisResult,
    previous: Option<&NotificationRecord>,
    now: DateTime<Utc>,
) -> Decision {
    let signal = result.buy_signal;
    let score = result.signal_score;

    match signal {
        BuySignal::StrongBuy => return Decision::Notify(NotifyReason::StrongBuy),
        BuySignal::StrongSell => return Decision::Notify(NotifyReason::StrongSell),
        _ => {}
    }

    if let Some(ratio) = result.volume_ratio {
        if ratio > settings.volume_alert {
            return Decision::Notify(NotifyReason::VolumeSpike(ratio));
        }
    }

    if let Some(macd) = result.macd_status.filter(|m| m.is_cross()) {
        return Decision::Notify(NotifyReason::MacdCross(macd));
    }

    if let Some(rsi) = result.rsi_12 {
        if rsi < RSI_OVERSOLD {
            return Decision::Notify(NotifyReason::RsiOversold(rsi));
        }
        if rsi > RSI_OVERBOUGHT {
            return Decision::Notify(NotifyReason::RsiOverbought(rsi));
        }
    }

    if let Some(prev) = previous {
        let elapsed = now - prev.notified_at;
        let window_ms = i64::try_from(settings.min_notify_interval.as_millis()).unwrap_or(i64::MAX);
        if elapsed.num_milliseconds() < window_ms {
            let score_change = score.abs_diff(prev.score);
            if signal == prev.signal && score_change < SCORE_CHANGE_THRESHOLD {
                return Decision::Suppress(SuppressReason::Duplicate {
                    elapsed_secs: elapsed.num_seconds(),
                    score_change,
                });
            }
        }
    }

    // A buy/sell reversal is never a duplicate (the signal changed) and is exempt from
    // the threshold and allow-list; the trend suppressor still applies.
    let reversal = previous
        .map(|prev| prev.signal)
        .filter(|&from| signal.is_reversal_of(from));

    if reversal.is_none() {
        if score < settings.notify_threshold {
            return Decision::Suppress(SuppressReason::BelowThreshold);
        }

        if !settings.allowed_signals.contains(&signal) {
            return Decision::Suppress(SuppressReason::SignalNotAllowed);
        }
    }

    if signal.is_neutral() {
        if let Some(prev) = previous {
            let score_change = score.abs_diff(prev.score);
            if score_change < SCORE_CHANGE_THRESHOLD {
                return Decision::Suppress(SuppressReason::NeutralUnchanged { score_change });
            }
        }
    }

    if result.trend_status == TrendStatus::Consolidation {
        return Decision::Suppress(SuppressReason::Consolidation);
    }

    if let Some(from) = reversal {
        return Decision::Notify(NotifyReason::Reversal { from, to: signal });
    }

    Decision::Notify(NotifyReason::Signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Arc;

    fn result(code: &str, signal: BuySignal, score: i32, trend: TrendStatus) -> AnalysisResult {
        AnalysisResult {
            code: code.to_string(),
            stock_name: format!("Name {code}"),
            timestamp: Utc::now(),
            current_price: 10.0,
            change_pct: 0.0,
            trend_status: trend,
            buy_signal: signal,
            signal_score: score,
            ma5: 10.0,
            ma10: 10.0,
            ma20: 10.0,
            bias_ma5: 0.0,
            volume_ratio: None,
            volume_status: None,
            macd_status: None,
            rsi_12: None,
            signal_reasons: vec![],
            risk_factors: vec![],
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, 30, 0).unwrap()
    }

    fn filter() -> ResultFilter {
        ResultFilter::new(FilterSettings::default()).unwrap()
    }

    #[test]
    fn strong_buy_without_history_notifies_and_records() {
        let f = filter();
        let r = result("600519", BuySignal::StrongBuy, 85, TrendStatus::Bull);

        assert_eq!(f.evaluate_at(&r, t0()), Decision::Notify(NotifyReason::StrongBuy));
        let rec = f.last_notification("600519").unwrap();
        assert_eq!(rec.signal, BuySignal::StrongBuy);
        assert_eq!(rec.score, 85);
        assert_eq!(rec.notified_at, t0());
    }

    #[test]
    fn strong_signals_ignore_dedup_and_score() {
        let f = filter();
        let buy = result("600519", BuySignal::StrongBuy, 5, TrendStatus::Consolidation);
        assert!(f.evaluate_at(&buy, t0()).is_notify());
        assert!(f.evaluate_at(&buy, t0() + ChronoDuration::seconds(1)).is_notify());

        let sell = result("600519", BuySignal::StrongSell, 0, TrendStatus::Consolidation);
        assert!(f.evaluate_at(&sell, t0() + ChronoDuration::seconds(2)).is_notify());
    }

    #[test]
    fn hold_in_consolidation_below_threshold_is_suppressed() {
        let f = filter();
        let r = result("000001", BuySignal::Hold, 50, TrendStatus::Consolidation);

        assert_eq!(
            f.evaluate_at(&r, t0()),
            Decision::Suppress(SuppressReason::BelowThreshold)
        );
        assert!(f.last_notification("000001").is_none());
    }

    #[test]
    fn volume_spike_notifies_below_threshold() {
        let f = filter();
        let mut r = result("300750", BuySignal::Hold, 55, TrendStatus::Bull);
        r.volume_ratio = Some(4.5);

        assert_eq!(
            f.evaluate_at(&r, t0()),
            Decision::Notify(NotifyReason::VolumeSpike(4.5))
        );
    }

    #[test]
    fn volume_ratio_at_alert_multiple_does_not_trigger() {
        let f = filter();
        let mut r = result("300750", BuySignal::Hold, 55, TrendStatus::Bull);
        r.volume_ratio = Some(3.0);
        assert!(!f.evaluate_at(&r, t0()).is_notify());
    }

    #[test]
    fn macd_crosses_notify_but_trend_states_do_not() {
        let f = filter();
        for (i, macd) in [
            MacdStatus::GoldenCrossZero,
            MacdStatus::GoldenCross,
            MacdStatus::DeathCross,
        ]
        .into_iter()
        .enumerate()
        {
            let mut r = result(&format!("00000{i}"), BuySignal::Wait, 10, TrendStatus::Bear);
            r.macd_status = Some(macd);
            assert_eq!(
                f.evaluate_at(&r, t0()),
                Decision::Notify(NotifyReason::MacdCross(macd))
            );
        }

        let mut r = result("000009", BuySignal::Wait, 10, TrendStatus::Bear);
        r.macd_status = Some(MacdStatus::Bullish);
        assert!(!f.evaluate_at(&r, t0()).is_notify());
    }

    #[test]
    fn rsi_bounds_are_strict() {
        let f = filter();
        let cases = [(30.0, false), (70.0, false), (29.9, true), (70.1, true), (50.0, false)];
        for (i, (rsi, expected)) in cases.into_iter().enumerate() {
            let mut r = result(&format!("60000{i}"), BuySignal::Hold, 40, TrendStatus::Bull);
            r.rsi_12 = Some(rsi);
            assert_eq!(f.evaluate_at(&r, t0()).is_notify(), expected, "rsi={rsi}");
        }
    }

    #[test]
    fn repeated_signal_inside_window_is_suppressed() {
        let f = filter();
        let first = result("600036", BuySignal::Buy, 70, TrendStatus::Bull);
        assert_eq!(f.evaluate_at(&first, t0()), Decision::Notify(NotifyReason::Signal));

        let second = result("600036", BuySignal::Buy, 80, TrendStatus::Bull);
        let later = t0() + ChronoDuration::seconds(60);
        assert_eq!(
            f.evaluate_at(&second, later),
            Decision::Suppress(SuppressReason::Duplicate {
                elapsed_secs: 60,
                score_change: 10,
            })
        );
        // Suppression leaves the earlier record alone.
        assert_eq!(f.last_notification("600036").unwrap().score, 70);
    }

    #[test]
    fn repeated_signal_after_window_notifies_again() {
        let f = filter();
        let r = result("600036", BuySignal::Buy, 70, TrendStatus::Bull);
        assert!(f.evaluate_at(&r, t0()).is_notify());
        assert!(f
            .evaluate_at(&r, t0() + ChronoDuration::seconds(1800))
            .is_notify());
    }

    #[test]
    fn large_score_move_inside_window_falls_through() {
        let f = filter();
        assert!(f
            .evaluate_at(&result("600036", BuySignal::Buy, 62, TrendStatus::Bull), t0())
            .is_notify());
        let jump = result("600036", BuySignal::Buy, 77, TrendStatus::Bull);
        assert!(f
            .evaluate_at(&jump, t0() + ChronoDuration::seconds(30))
            .is_notify());
    }

    #[test]
    fn buy_to_sell_reversal_notifies() {
        let mut settings = FilterSettings::default();
        settings.allowed_signals.insert(BuySignal::Sell);
        let f = ResultFilter::new(settings).unwrap();

        let buy = result("002594", BuySignal::Buy, 65, TrendStatus::Bull);
        assert!(f.evaluate_at(&buy, t0()).is_notify());

        // Inside the window with a tiny score move, but the classification changed.
        let sell = result("002594", BuySignal::Sell, 62, TrendStatus::Bear);
        assert_eq!(
            f.evaluate_at(&sell, t0() + ChronoDuration::seconds(120)),
            Decision::Notify(NotifyReason::Reversal {
                from: BuySignal::Buy,
                to: BuySignal::Sell,
            })
        );
        assert_eq!(f.last_notification("002594").unwrap().signal, BuySignal::Sell);
    }

    #[test]
    fn reversal_notifies_below_threshold_and_outside_allow_list() {
        let f = filter();

        assert!(f
            .evaluate_at(&result("002594", BuySignal::Buy, 65, TrendStatus::Bull), t0())
            .is_notify());
        // SELL is not in the default allow-list and 30 is under the threshold.
        let weak_sell = result("002594", BuySignal::Sell, 30, TrendStatus::Bear);
        assert_eq!(
            f.evaluate_at(&weak_sell, t0() + ChronoDuration::seconds(120)),
            Decision::Notify(NotifyReason::Reversal {
                from: BuySignal::Buy,
                to: BuySignal::Sell,
            })
        );
    }

    #[test]
    fn reversal_in_consolidation_is_suppressed() {
        let mut settings = FilterSettings::default();
        settings.allowed_signals.insert(BuySignal::Sell);
        let f = ResultFilter::new(settings).unwrap();

        assert!(f
            .evaluate_at(&result("002594", BuySignal::Buy, 70, TrendStatus::Bull), t0())
            .is_notify());
        let sell = result("002594", BuySignal::Sell, 75, TrendStatus::Consolidation);
        assert_eq!(
            f.evaluate_at(&sell, t0() + ChronoDuration::hours(1)),
            Decision::Suppress(SuppressReason::Consolidation)
        );
        assert_eq!(f.last_notification("002594").unwrap().signal, BuySignal::Buy);
    }

    #[test]
    fn extreme_scores_do_not_overflow_score_change() {
        let f = filter();
        assert!(f
            .evaluate_at(&result("600000", BuySignal::StrongBuy, i32::MIN, TrendStatus::Bull), t0())
            .is_notify());

        let buy = result("600000", BuySignal::Buy, 10, TrendStatus::Bull);
        assert_eq!(
            f.evaluate_at(&buy, t0() + ChronoDuration::seconds(60)),
            Decision::Suppress(SuppressReason::BelowThreshold)
        );

        let hold = result("600000", BuySignal::Hold, i32::MAX, TrendStatus::Bull);
        let mut settings = FilterSettings::default();
        settings.allowed_signals.insert(BuySignal::Hold);
        let g = ResultFilter::new(settings).unwrap();
        assert!(g
            .evaluate_at(&result("600000", BuySignal::StrongSell, i32::MIN, TrendStatus::Bear), t0())
            .is_notify());
        assert!(g
            .evaluate_at(&hold, t0() + ChronoDuration::hours(2))
            .is_notify());
    }

    #[test]
    fn neutral_after_buy_is_not_a_reversal() {
        let f = filter();
        assert!(f
            .evaluate_at(&result("002594", BuySignal::Buy, 65, TrendStatus::Bull), t0())
            .is_notify());
        let hold = result("002594", BuySignal::Hold, 40, TrendStatus::Bull);
        assert_eq!(
            f.evaluate_at(&hold, t0() + ChronoDuration::seconds(120)),
            Decision::Suppress(SuppressReason::BelowThreshold)
        );
    }

    #[test]
    fn signal_outside_allow_list_is_suppressed() {
        let f = filter();
        let r = result("601318", BuySignal::Sell, 75, TrendStatus::Bear);
        assert_eq!(
            f.evaluate_at(&r, t0()),
            Decision::Suppress(SuppressReason::SignalNotAllowed)
        );
    }

    #[test]
    fn neutral_signal_with_small_move_is_suppressed_outside_window() {
        let mut settings = FilterSettings::default();
        settings.allowed_signals.insert(BuySignal::Hold);
        let f = ResultFilter::new(settings).unwrap();

        let buy = result("000858", BuySignal::Buy, 70, TrendStatus::Bull);
        assert!(f.evaluate_at(&buy, t0()).is_notify());

        let hold = result("000858", BuySignal::Hold, 75, TrendStatus::Bull);
        assert_eq!(
            f.evaluate_at(&hold, t0() + ChronoDuration::hours(2)),
            Decision::Suppress(SuppressReason::NeutralUnchanged { score_change: 5 })
        );
    }

    #[test]
    fn consolidation_suppresses_allowed_signal() {
        let f = filter();
        let r = result("601012", BuySignal::Buy, 80, TrendStatus::Consolidation);
        assert_eq!(
            f.evaluate_at(&r, t0()),
            Decision::Suppress(SuppressReason::Consolidation)
        );
    }

    #[test]
    fn clear_cache_forgets_every_symbol() {
        let f = filter();
        let r = result("600036", BuySignal::Buy, 70, TrendStatus::Bull);
        assert!(f.evaluate_at(&r, t0()).is_notify());
        assert_eq!(f.stats().cached_stocks, 1);

        f.clear_cache();
        assert_eq!(f.stats().cached_stocks, 0);
        assert!(f
            .evaluate_at(&r, t0() + ChronoDuration::seconds(10))
            .is_notify());
    }

    #[test]
    fn stats_reports_configuration() {
        let f = filter();
        let stats = f.stats();
        assert_eq!(stats.threshold, 60);
        assert_eq!(stats.volume_alert, 3.0);
        assert_eq!(stats.min_interval_secs, 1800);
        assert_eq!(
            stats.allowed_signals,
            vec![BuySignal::StrongBuy, BuySignal::Buy, BuySignal::StrongSell]
        );
    }

    #[test]
    fn rejects_negative_volume_alert() {
        let mut settings = FilterSettings::default();
        settings.volume_alert = -1.0;
        assert!(ResultFilter::new(settings).is_err());
    }

    #[test]
    fn concurrent_decisions_for_distinct_symbols_all_record() {
        let f = Arc::new(filter());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    let r = result(&format!("{i:06}"), BuySignal::StrongBuy, 90, TrendStatus::Bull);
                    f.evaluate_at(&r, t0()).is_notify()
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(f.stats().cached_stocks, 16);
    }

    #[test]
    fn concurrent_decisions_for_one_symbol_leave_a_single_written_record() {
        let f = Arc::new(filter());
        let written: Vec<(BuySignal, i32)> = (0..32)
            .map(|i| {
                let signal = if i % 2 == 0 {
                    BuySignal::StrongBuy
                } else {
                    BuySignal::StrongSell
                };
                (signal, i)
            })
            .collect();

        let handles: Vec<_> = written
            .iter()
            .copied()
            .map(|(signal, score)| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let r = result("600519", signal, score, TrendStatus::Bull);
                        assert!(f.evaluate_at(&r, t0()).is_notify());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(f.stats().cached_stocks, 1);
        let record = f.last_notification("600519").unwrap();
        assert_eq!(record.notified_at, t0());
        assert!(written.contains(&(record.signal, record.score)));
    }
}
