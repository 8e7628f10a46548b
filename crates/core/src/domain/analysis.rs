use crate::domain::signal::{BuySignal, MacdStatus, TrendStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeQuote {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub change_pct: f64,
    #[serde(default)]
    pub volume_ratio: Option<f64>,
    #[serde(default)]
    pub turnover_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Analyzer verdict for one bar series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendVerdict {
    pub trend_status: TrendStatus,
    pub buy_signal: BuySignal,
    pub signal_score: i32,
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub bias_ma5: f64,
    #[serde(default)]
    pub volume_status: Option<String>,
    #[serde(default)]
    pub macd_status: Option<MacdStatus>,
    #[serde(default)]
    pub rsi_12: Option<f64>,
    #[serde(default)]
    pub signal_reasons: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub code: String,
    pub stock_name: String,
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub change_pct: f64,

    pub trend_status: TrendStatus,
    pub buy_signal: BuySignal,
    pub signal_score: i32,
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub bias_ma5: f64,
    pub volume_ratio: Option<f64>,
    pub volume_status: Option<String>,
    pub macd_status: Option<MacdStatus>,
    pub rsi_12: Option<f64>,

    pub signal_reasons: Vec<String>,
    pub risk_factors: Vec<String>,
}

impl AnalysisResult {
    /// Quote fields win for identity and price; everything technical comes from the verdict.
    pub fn assemble(
        code: &str,
        quote: RealtimeQuote,
        verdict: TrendVerdict,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let stock_name = if quote.name.trim().is_empty() {
            code.to_string()
        } else {
            quote.name
        };

        Self {
            code: code.to_string(),
            stock_name,
            timestamp,
            current_price: quote.price,
            change_pct: quote.change_pct,
            trend_status: verdict.trend_status,
            buy_signal: verdict.buy_signal,
            signal_score: verdict.signal_score,
            ma5: verdict.ma5,
            ma10: verdict.ma10,
            ma20: verdict.ma20,
            bias_ma5: verdict.bias_ma5,
            volume_ratio: quote.volume_ratio,
            volume_status: verdict.volume_status,
            macd_status: verdict.macd_status,
            rsi_12: verdict.rsi_12,
            signal_reasons: verdict.signal_reasons,
            risk_factors: verdict.risk_factors,
        }
    }
}
