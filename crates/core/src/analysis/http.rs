use crate::analysis::Analyzer;
use crate::config::Settings;
use crate::domain::{DailyBar, TrendVerdict};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for an analysis service that computes MA/MACD/RSI verdicts.
#[derive(Debug, Clone)]
pub struct HttpAnalyzerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    code: &'a str,
    bars: &'a [DailyBar],
}

impl HttpAnalyzerClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_analyzer_base_url()?.to_string();
        let api_key = std::env::var("ANALYZER_API_KEY").ok();

        let timeout_secs = std::env::var("ANALYZER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build analyzer http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/v1/analyze", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl Analyzer for HttpAnalyzerClient {
    async fn analyze(&self, code: &str, bars: &[DailyBar]) -> anyhow::Result<TrendVerdict> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }

        let res = self
            .http
            .post(self.url())
            .headers(headers)
            .json(&AnalyzeRequest { code, bars })
            .send()
            .await
            .with_context(|| format!("analyzer request failed for {code}"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read analyzer response body")?;
        if !status.is_success() {
            anyhow::bail!("analyzer HTTP {status}: {text}");
        }

        serde_json::from_str::<TrendVerdict>(&text)
            .with_context(|| format!("failed to decode analyzer verdict: {text}"))
    }
}
