use crate::config::Settings;
use crate::domain::{DailyBar, RealtimeQuote};
use crate::ingest::types::QuoteResponse;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/v1/quotes";

/// Real-time quote lookup. `Ok(None)` means the source has no quote for the code right now.
#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn realtime_quote(&self, code: &str) -> Result<Option<RealtimeQuote>>;
}

/// Daily bar history, oldest first. `Ok(None)` means nothing is stored for the code.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    async fn daily_bars(&self, code: &str, limit: usize) -> Result<Option<Vec<DailyBar>>>;
}

/// Quote client for an HTTP JSON quote service.
///
/// One attempt per call: a failed quote means one fewer result this cycle and the next
/// trigger tries again.
#[derive(Debug, Clone)]
pub struct HttpQuoteProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
}

impl HttpQuoteProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let path = std::env::var("DATA_PROVIDER_QUOTES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build quote provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
        })
    }

    fn url(&self, code: &str) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_end_matches('/'),
            code
        )
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl QuoteSource for HttpQuoteProvider {
    fn source_name(&self) -> &'static str {
        "http_json_quotes"
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<RealtimeQuote>> {
        let res = self
            .http
            .get(self.url(code))
            .headers(self.headers()?)
            .send()
            .await
            .with_context(|| format!("quote request failed for {code}"))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read quote response")?;
        if !status.is_success() {
            anyhow::bail!("quote provider HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<QuoteResponse>(&text)
            .with_context(|| format!("quote response is not a valid quote: {text}"))?;
        validate_quote(&parsed.quote, code)?;
        Ok(Some(parsed.quote))
    }
}

fn validate_quote(quote: &RealtimeQuote, expected_code: &str) -> Result<()> {
    anyhow::ensure!(
        quote.code.trim() == expected_code,
        "quote code mismatch: expected {expected_code}, got {}",
        quote.code
    );
    anyhow::ensure!(
        quote.price.is_finite() && quote.price > 0.0,
        "quote price must be positive (got {})",
        quote.price
    );
    anyhow::ensure!(
        quote.change_pct.is_finite(),
        "quote change_pct must be finite"
    );
    Ok(())
}
